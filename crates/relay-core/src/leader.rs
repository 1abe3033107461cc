//! Leader selection.
//!
//! The leader is derived, never stored on its own: it is the member whose
//! username sorts last under case-insensitive comparison. Usernames are
//! unique case-insensitively, so there are no ties.

use crate::Username;

/// Picks the leader among `members`, or `None` when there are no members.
///
/// A full linear scan on every call. Membership is small and the registry
/// calls this once per join or leave.
pub fn select_leader<'a, I>(members: I) -> Option<&'a Username>
where
    I: IntoIterator<Item = &'a Username>,
{
    members
        .into_iter()
        .max_by(|a, b| a.cmp_ignore_case(b))
}
