/// Marker in a brightness command template replaced by the requested level.
pub const PLACEHOLDER: &str = "XXX";
pub const DEFAULT_LEVEL: u32 = 50;
pub const MAX_LEVEL: u32 = 100;

pub fn clamp_level(level: u32) -> u32 {
    level.min(MAX_LEVEL)
}

/// Parses a run of ASCII digits. Values too large for `u32` saturate to
/// [`MAX_LEVEL`]; anything else is `None`.
pub fn parse_level(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse().unwrap_or(MAX_LEVEL))
}

/// Substitutes every placeholder in `template` with `level`.
pub fn render(template: &str, level: u32) -> String {
    template.replace(PLACEHOLDER, &level.to_string())
}
