//! Sub-UID/sub-GID mapping construction: the mapping always starts with the
//! identity entry `{inside: 0, outside: real_id, count: 1}`, then walks
//! `/etc/subuid`/`/etc/subgid` for `username:base:count` lines, assigning
//! consecutive inside ids starting at 1.

use std::path::Path;

/// One `newuidmap`/`newgidmap` triple: `inside_id outside_id count`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdMapEntry {
    pub inside: u64,
    pub outside: u64,
    pub count: u64,
}

/// Build the mapping for `username`, reading `path` (`/etc/subuid` or
/// `/etc/subgid`). Unparseable lines are skipped with a warning. A user
/// with no configured sub-ranges yields the identity-only mapping and a
/// warning about limited user/group support.
pub fn build_idmap(username: &str, path: &Path, real_id: u32) -> Vec<IdMapEntry> {
    let mut mapping = vec![IdMapEntry { inside: 0, outside: real_id as u64, count: 1 }];
    let mut next_inside = 1u64;

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => String::new(),
    };

    for line in content.lines() {
        let Some(rest) = line.strip_prefix(username) else { continue };
        let Some(rest) = rest.strip_prefix(':') else { continue };
        let mut parts = rest.splitn(2, ':');
        let (Some(base_str), Some(count_str)) = (parts.next(), parts.next()) else {
            tracing::warn!(file = %path.display(), "WARNING: Invalid format");
            continue;
        };
        let (Ok(base), Ok(count)) = (base_str.parse::<u64>(), count_str.parse::<u64>()) else {
            tracing::warn!(file = %path.display(), "WARNING: Invalid format");
            continue;
        };
        mapping.push(IdMapEntry { inside: next_inside, outside: base, count });
        next_inside += count;
    }

    if next_inside == 1 {
        tracing::warn!(username, file = %path.display(), "no defined ids for user, limited user/group support");
    }

    mapping
}

/// Render entries as the flat argument list `newuidmap`/`newgidmap` expect:
/// `inside outside count` repeated, as strings.
pub fn to_args(entries: &[IdMapEntry]) -> Vec<String> {
    entries.iter().flat_map(|e| [e.inside.to_string(), e.outside.to_string(), e.count.to_string()]).collect()
}
