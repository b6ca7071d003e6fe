//! Canonical node identifiers.
//!
//! Every document and graph node is globally identified as
//! `<repo>::<branch>::<local_id>`. The mapping between local and canonical
//! form is a pure, reversible string transform; content resolution
//! additionally strips an optional `:part=<n>` chunk suffix.

const SEP: &str = "::";
const PART_SUFFIX: &str = ":part=";

pub fn make_canonical(repository: &str, branch: &str, local_id: &str) -> String {
    format!("{repository}{SEP}{branch}{SEP}{local_id}")
}

/// Strip the `repo::branch::` prefix when it matches the given scope.
/// Ids outside the scope (or already local) are returned unchanged.
pub fn strip_namespace<'a>(id: &'a str, repository: &str, branch: &str) -> &'a str {
    let prefix_len = repository.len() + SEP.len() + branch.len() + SEP.len();
    if id.len() > prefix_len
        && id.starts_with(repository)
        && id[repository.len()..].starts_with(SEP)
        && id[repository.len() + SEP.len()..].starts_with(branch)
        && id[repository.len() + SEP.len() + branch.len()..].starts_with(SEP)
    {
        &id[prefix_len..]
    } else {
        id
    }
}

/// Strip a trailing `:part=<n>` chunk suffix for content resolution.
pub fn strip_part_suffix(local_id: &str) -> &str {
    if let Some(pos) = local_id.rfind(PART_SUFFIX) {
        let tail = &local_id[pos + PART_SUFFIX.len()..];
        if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
            return &local_id[..pos];
        }
    }
    local_id
}
