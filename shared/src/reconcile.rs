//! Merging fetched collections into displayed state.

use std::collections::HashSet;

use crate::model::{Comment, Notification, NotificationId, Profile};

/// Online profiles first, offline after. Stable, so the server's order is
/// kept within each group.
pub fn order_by_presence(mut profiles: Vec<Profile>) -> Vec<Profile> {
    profiles.sort_by_key(|p| !p.is_online());
    profiles
}

/// Swaps in `updated` wherever a listing with the same id sits. Returns
/// whether anything was replaced.
pub fn replace_in_listings(listings: &mut [Profile], updated: &Profile) -> bool {
    let mut replaced = false;
    for slot in listings.iter_mut().filter(|p| p.id == updated.id) {
        slot.clone_from(updated);
        replaced = true;
    }
    replaced
}

/// Puts a just-created comment at the head of the list unless it is already
/// there.
pub fn prepend_local_comment(comments: &mut Vec<Comment>, comment: Comment) {
    if comments.iter().any(|c| c.id == comment.id) {
        return;
    }
    comments.insert(0, comment);
}

/// Takes the incoming list as the new baseline, except that a notification
/// already read locally stays read.
pub fn merge_notifications(current: &[Notification], incoming: Vec<Notification>) -> Vec<Notification> {
    let read: HashSet<&NotificationId> = current.iter().filter(|n| n.read).map(|n| &n.id).collect();
    incoming
        .into_iter()
        .map(|mut n| {
            if read.contains(&n.id) {
                n.mark_read();
            }
            n
        })
        .collect()
}

pub fn mark_all_read(notifications: &mut [Notification]) {
    for n in notifications {
        n.mark_read();
    }
}

pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommentId, Presence, UnixTimeMs};
    use proptest::prelude::*;

    fn profile(id: &str, online: Option<bool>) -> Profile {
        let mut p = Profile::new(id, id);
        p.presence = online.map(|o| if o { Presence::Online } else { Presence::Offline });
        p
    }

    fn notification(id: &str, read: bool) -> Notification {
        Notification {
            id: NotificationId::new(id),
            kind: "comment".into(),
            title: id.into(),
            body: String::new(),
            read,
            created_at: UnixTimeMs(0),
        }
    }

    fn comment(id: &str) -> Comment {
        Comment {
            id: CommentId::new(id),
            name: "Rita".into(),
            message: "hi".into(),
            created_at: UnixTimeMs(0),
        }
    }

    #[test]
    fn test_online_first_with_absent_as_online() {
        let ordered = order_by_presence(vec![
            profile("a", Some(false)),
            profile("b", None),
            profile("c", Some(true)),
            profile("d", Some(false)),
        ]);
        let ids: Vec<_> = ordered.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_replace_in_listings_keeps_position() {
        let mut listings = vec![profile("a", None), profile("b", None), profile("c", None)];
        let mut updated = profile("b", Some(false));
        updated.name = "Bia".into();

        assert!(replace_in_listings(&mut listings, &updated));
        assert_eq!(listings[1].name, "Bia");
        assert!(!replace_in_listings(&mut listings, &profile("z", None)));
    }

    #[test]
    fn test_prepend_comment_dedupes() {
        let mut comments = vec![comment("c1")];
        prepend_local_comment(&mut comments, comment("c2"));
        prepend_local_comment(&mut comments, comment("c2"));
        let ids: Vec<_> = comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
    }

    #[test]
    fn test_read_flag_never_reverts() {
        let current = vec![notification("n1", true), notification("n2", false)];
        let incoming = vec![
            notification("n3", false),
            notification("n1", false),
            notification("n2", true),
        ];

        let merged = merge_notifications(&current, incoming);
        let flags: Vec<_> = merged.iter().map(|n| (n.id.as_str(), n.read)).collect();
        assert_eq!(flags, vec![("n3", false), ("n1", true), ("n2", true)]);
        assert_eq!(unread_count(&merged), 1);
    }

    #[test]
    fn test_mark_all_read() {
        let mut list = vec![notification("n1", false), notification("n2", false)];
        mark_all_read(&mut list);
        assert_eq!(unread_count(&list), 0);
    }

    proptest! {
        #[test]
        fn prop_presence_order_is_stable_partition(flags in proptest::collection::vec(proptest::option::of(any::<bool>()), 0..40)) {
            let input: Vec<Profile> = flags
                .iter()
                .enumerate()
                .map(|(i, f)| profile(&i.to_string(), *f))
                .collect();
            let output = order_by_presence(input.clone());

            prop_assert_eq!(output.len(), input.len());

            let first_offline = output.iter().position(|p| !p.is_online()).unwrap_or(output.len());
            prop_assert!(output[first_offline..].iter().all(|p| !p.is_online()));

            let expected: Vec<_> = input
                .iter()
                .filter(|p| p.is_online())
                .chain(input.iter().filter(|p| !p.is_online()))
                .map(|p| p.id.clone())
                .collect();
            let actual: Vec<_> = output.iter().map(|p| p.id.clone()).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
