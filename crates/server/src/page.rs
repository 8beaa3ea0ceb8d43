use std::fmt::Write as _;

use dispatcher::deeplink::{scheme_for_platform, DEFAULT_SCHEME, MUSIC_PLATFORMS};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use shared::{
    domain::{ItemKind, Settings},
    protocol::NamedItem,
};

use crate::api::ItemFilter;

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn item_path(action: &str, name: &str) -> String {
    format!("/{action}/{}", utf8_percent_encode(name, PATH_SEGMENT))
}

fn checked(flag: bool) -> &'static str {
    if flag {
        " checked"
    } else {
        ""
    }
}

/// Renders the single management page.
pub(crate) fn render_index(
    items: &[NamedItem],
    settings: &Settings,
    flashes: &[String],
    filter: &ItemFilter,
) -> String {
    let mut html = String::from(
        "<!doctype html>\n<html lang=\"zh-CN\">\n<head><meta charset=\"utf-8\">\
         <title>SmartLink</title></head>\n<body>\n<h1>SmartLink</h1>\n",
    );

    if !flashes.is_empty() {
        html.push_str("<ul class=\"flash\">\n");
        for message in flashes {
            let _ = writeln!(html, "<li><pre>{}</pre></li>", escape_html(message));
        }
        html.push_str("</ul>\n");
    }

    render_filter(&mut html, filter);
    render_items(&mut html, items);
    render_item_form(&mut html, settings);
    render_settings(&mut html, settings);
    render_tools(&mut html);

    html.push_str("</body>\n</html>\n");
    html
}

fn render_filter(html: &mut String, filter: &ItemFilter) {
    let current = filter.kind.as_deref().unwrap_or_default();
    html.push_str("<form method=\"get\" action=\"/\">\n<select name=\"type\">\n<option value=\"\">all</option>\n");
    for kind in ItemKind::known() {
        let selected = if kind.as_str() == current { " selected" } else { "" };
        let _ = writeln!(html, "<option value=\"{kind}\"{selected}>{kind}</option>");
    }
    let _ = writeln!(
        html,
        "</select>\n<input name=\"kw\" placeholder=\"name or topic\" value=\"{}\">\n\
         <button type=\"submit\">filter</button>\n</form>",
        escape_html(filter.keyword.as_deref().unwrap_or_default())
    );
}

fn render_items(html: &mut String, items: &[NamedItem]) {
    html.push_str(
        "<table>\n<tr><th>name</th><th>type</th><th>command</th><th>cards</th>\
         <th>topic</th><th></th></tr>\n",
    );
    for NamedItem { name, item } in items {
        let value_input = if item.kind == ItemKind::Brightness {
            "<input name=\"brightness_value\" type=\"number\" min=\"0\" max=\"100\" value=\"50\">"
        } else {
            ""
        };
        let _ = writeln!(
            html,
            "<tr><td>{name}</td><td>{kind}</td><td><pre>{cmd}</pre></td><td>{cards}</td><td>{topic}</td><td>\
             <form method=\"post\" action=\"{run}\">{value_input}<button type=\"submit\">run</button></form>\
             <form method=\"post\" action=\"{delete}\"><button type=\"submit\">delete</button></form>\
             </td></tr>",
            name = escape_html(name),
            kind = escape_html(item.kind.as_str()),
            cmd = escape_html(&item.command),
            cards = escape_html(&item.card_id),
            topic = escape_html(&item.topic),
            run = item_path("run_item", name),
            delete = item_path("delete_item", name),
        );
    }
    html.push_str("</table>\n");
}

fn render_item_form(html: &mut String, settings: &Settings) {
    html.push_str("<h2>item</h2>\n<form method=\"post\" action=\"/save_item\">\n");
    html.push_str("<input name=\"old_name\" placeholder=\"current name (rename)\">\n");
    html.push_str("<input name=\"name\" placeholder=\"name\" required>\n<select name=\"type\">\n");
    for kind in ItemKind::known() {
        let _ = writeln!(html, "<option value=\"{kind}\">{kind}</option>");
    }
    html.push_str(
        "</select>\n<textarea name=\"cmd\" placeholder=\"command or JSON payload\"></textarea>\n",
    );
    let scheme = scheme_for_platform(&settings.music_platform).unwrap_or(DEFAULT_SCHEME);
    let _ = writeln!(
        html,
        "<input name=\"uri_scheme\" value=\"{}\" placeholder=\"{DEFAULT_SCHEME}\">",
        escape_html(scheme)
    );
    html.push_str(
        "<input name=\"card_id\" placeholder=\"card ids, comma separated\">\n\
         <input name=\"bafy_topic\" placeholder=\"cloud topic\">\n\
         <label><input type=\"checkbox\" name=\"run_after_save\" value=\"1\"> run after save</label>\n\
         <button type=\"submit\">save</button>\n</form>\n",
    );
}

fn render_settings(html: &mut String, settings: &Settings) {
    html.push_str("<h2>settings</h2>\n<form method=\"post\" action=\"/save_settings\">\n");
    for (field, label, value) in [
        ("adb_ip", "device address", &settings.adb_ip),
        ("serial_port", "card reader port", &settings.serial_port),
        ("bafy_uid", "cloud uid", &settings.cloud_uid),
        ("bafy_topic", "global cloud topic", &settings.cloud_topic),
        ("device_password", "device password", &settings.device_password),
    ] {
        let _ = writeln!(
            html,
            "<label>{label} <input name=\"{field}\" value=\"{}\"></label>",
            escape_html(value)
        );
    }

    html.push_str("<select name=\"music_platform\">\n");
    for (platform, _) in MUSIC_PLATFORMS {
        let selected = if platform == settings.music_platform { " selected" } else { "" };
        let _ = writeln!(html, "<option{selected}>{platform}</option>");
    }
    html.push_str("</select>\n");

    for (field, label, flag) in [
        ("enable_card_reader", "card reader", settings.enable_card_reader),
        ("enable_adb_connect", "connect device on start", settings.enable_adb_connect),
        ("music_screen_on", "wake before music", settings.music_screen_on),
        ("adb_screen_on", "wake before adb", settings.adb_screen_on),
        ("unlock_after_screen_on", "unlock after wake", settings.unlock_after_screen_on),
    ] {
        let _ = writeln!(
            html,
            "<label><input type=\"checkbox\" name=\"{field}\" value=\"1\"{}> {label}</label>",
            checked(flag)
        );
    }
    html.push_str("<button type=\"submit\">save settings</button>\n</form>\n");
}

fn render_tools(html: &mut String) {
    html.push_str(
        "<h2>device</h2>\n\
         <form method=\"post\" action=\"/connect_adb\"><button type=\"submit\">connect</button></form>\n\
         <form method=\"post\" action=\"/disconnect_adb\"><button type=\"submit\">disconnect</button></form>\n\
         <h2>cloud</h2>\n\
         <form method=\"post\" action=\"/cloud/on\"><button type=\"submit\">on</button></form>\n\
         <form method=\"post\" action=\"/cloud/off\"><button type=\"submit\">off</button></form>\n\
         <h2>music link</h2>\n\
         <form method=\"post\" action=\"/parse_music\">\
         <input name=\"music_link\" placeholder=\"kugou://start.weixin?...\">\
         <button type=\"submit\">parse</button></form>\n",
    );
}
