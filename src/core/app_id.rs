/*
 * Derives the identifiers the external launcher uses for non-native shortcuts.
 *
 * The 32-bit app id is a standard reflected CRC-32 (polynomial 0xEDB88320) over the
 * UTF-8 bytes of `exe + name`, with the high bit forced on to place it in the
 * shortcut id space. The 64-bit composite id embeds that value in its upper half and
 * is what launch URLs of the form `<scheme>://rungameid/<composite>` carry.
 *
 * The stable content id is a separate SHA-256 based key, used only as the default
 * catalog-side key when importing a shortcut that has no numeric id.
 */
use sha2::{Digest, Sha256};

pub const SHORTCUT_ID_FLAG: u32 = 0x8000_0000;
pub const COMPOSITE_ID_LOW_BITS: u64 = 0x0200_0000;
pub const DEFAULT_LAUNCH_SCHEME: &str = "steam";
const RUN_GAME_ID_PATH: &str = "://rungameid/";

pub fn derive_app_id(exe: &str, name: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(exe.as_bytes());
    hasher.update(name.as_bytes());
    hasher.finalize() | SHORTCUT_ID_FLAG
}

pub fn to_composite_id(app_id: u32) -> u64 {
    (u64::from(app_id) << 32) | COMPOSITE_ID_LOW_BITS
}

pub fn launch_url(scheme: &str, app_id: u32) -> String {
    format!("{scheme}{RUN_GAME_ID_PATH}{}", to_composite_id(app_id))
}

/*
 * Inverse of `launch_url` for the default scheme.
 */
pub fn parse_composite_id(url: &str) -> Option<u32> {
    parse_composite_id_with_scheme(url, DEFAULT_LAUNCH_SCHEME)
}

/*
 * Extracts the 32-bit app id from `<scheme>://rungameid/<composite>`. Returns `None`
 * for another scheme, a non-numeric or overflowing suffix, or a composite id whose
 * lower half does not mark a shortcut.
 */
pub fn parse_composite_id_with_scheme(url: &str, scheme: &str) -> Option<u32> {
    let url = url.trim();
    let prefix_len = scheme.len() + RUN_GAME_ID_PATH.len();
    let prefix = url.get(..prefix_len)?;
    let url_scheme = prefix.get(..scheme.len())?;
    let url_path = prefix.get(scheme.len()..)?;
    if !url_scheme.eq_ignore_ascii_case(scheme) || !url_path.eq_ignore_ascii_case(RUN_GAME_ID_PATH)
    {
        return None;
    }
    let suffix = &url[prefix_len..];
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let composite: u64 = suffix.parse().ok()?;
    if composite & 0xFFFF_FFFF != COMPOSITE_ID_LOW_BITS {
        return None;
    }
    Some((composite >> 32) as u32)
}

/*
 * True when `url` uses the given launch scheme at all, regardless of what follows.
 */
pub fn uses_launch_scheme(url: &str, scheme: &str) -> bool {
    let url = url.trim();
    url.get(..scheme.len() + 3)
        .is_some_and(|head| head.eq_ignore_ascii_case(&format!("{scheme}://")))
}

/*
 * Hex SHA-256 of `exe + "|" + name`. Always 64 lowercase hex characters.
 */
pub fn stable_content_id(exe: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(exe.as_bytes());
    hasher.update(b"|");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{digest:x}");
    log::trace!("AppId: Stable content id {hex} for '{name}'");
    hex
}
