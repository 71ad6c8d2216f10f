//! Client-supplied filenames: sanitizing and generating storage names.

use tracing::debug;

/// Longest sanitized filename, extension included.
pub const MAX_FILENAME_LENGTH: usize = 200;

/// Last path component of a client filename. Both `/` and `\` separate
/// components; trailing separators are ignored.
pub fn basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

/// Extension of the basename including the dot, case preserved. Names
/// without a dot, or whose only dot leads the name, have none.
pub fn extension_of(name: &str) -> &str {
    let base = basename(name);
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[idx..],
        _ => "",
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Reduces a client filename to a safe basename: characters outside
/// `[A-Za-z0-9._-]` become `_` and the result is cut to
/// [`MAX_FILENAME_LENGTH`], keeping the extension. Idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = basename(name)
        .chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect();

    if sanitized.len() <= MAX_FILENAME_LENGTH {
        return sanitized;
    }

    // Only ASCII remains, so byte offsets are char offsets.
    let ext = extension_of(&sanitized);
    if ext.len() >= MAX_FILENAME_LENGTH {
        return sanitized[..MAX_FILENAME_LENGTH].to_string();
    }
    let stem_len = MAX_FILENAME_LENGTH - ext.len();
    format!("{}{}", &sanitized[..stem_len], ext)
}

/// Storage name for an upload:
/// `<now_ms>_<16 hex chars>[_<user id, 8 chars>]_<stem><ext>`.
pub fn generate_secure_filename(original: &str, user_id: Option<&str>, now_ms: u64) -> String {
    let sanitized = sanitize_filename(original);
    if sanitized != basename(original) {
        debug!(original = %original, sanitized = %sanitized, "filename sanitized");
    }

    let ext = extension_of(&sanitized);
    let stem = &sanitized[..sanitized.len() - ext.len()];
    let random: [u8; 8] = rand::random();

    let user_part = user_id
        .map(|id| {
            id.chars()
                .take(8)
                .map(|c| if is_safe_char(c) && c != '.' { c } else { '_' })
                .collect::<String>()
        })
        .filter(|id| !id.is_empty())
        .map(|id| format!("_{}", id))
        .unwrap_or_default();

    format!("{}_{}{}_{}{}", now_ms, hex::encode(random), user_part, stem, ext)
}
