// SPDX-License-Identifier: MIT

use super::*;
use std::collections::HashMap;

/// Group database fixture.
struct FakeGroups(HashMap<String, Vec<String>>);

impl FakeGroups {
    fn new(groups: &[(&str, &[&str])]) -> Self {
        Self(
            groups
                .iter()
                .map(|(name, members)| {
                    (name.to_string(), members.iter().map(|m| m.to_string()).collect())
                })
                .collect(),
        )
    }
}

impl GroupResolver for FakeGroups {
    fn members(&self, group: &str) -> Vec<String> {
        self.0.get(group).cloned().unwrap_or_default()
    }
}

fn fields(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn load(content: &str) -> UserProfiles {
    let groups = FakeGroups::new(&[("science", &["alice", "carol"])]);
    UserProfiles::load(
        content,
        &fields(&["max-jobs", "allow-containers", "default-queues", "limits", "cpu-share"]),
        &groups,
    )
    .unwrap()
}

#[test]
fn specificity_user_beats_group_beats_all() {
    let profiles = load(
        "[*]\n\
         max-jobs = 5\n\
         [@science]\n\
         max-jobs = 10\n\
         [alice]\n\
         max-jobs = 20\n",
    );

    assert_eq!(profiles.get_uint("max-jobs", "alice").unwrap(), 20);
    assert_eq!(profiles.get_uint("max-jobs", "carol").unwrap(), 10);
    assert_eq!(profiles.get_uint("max-jobs", "bob").unwrap(), 5);
}

#[test]
fn later_section_of_equal_specificity_wins() {
    let profiles = load(
        "[*]\n\
         max-jobs = 5\n\
         [*]\n\
         max-jobs = 7\n",
    );

    assert_eq!(profiles.get_uint("max-jobs", "anyone").unwrap(), 7);
}

#[test]
fn earlier_user_section_still_beats_later_group_section() {
    let profiles = load(
        "[alice]\n\
         max-jobs = 20\n\
         [@science]\n\
         max-jobs = 10\n",
    );

    assert_eq!(profiles.get_uint("max-jobs", "alice").unwrap(), 20);
}

#[test]
fn last_duplicate_key_in_a_section_wins() {
    let profiles = load(
        "[*]\n\
         max-jobs = 5\n\
         max-jobs = 6\n",
    );

    assert_eq!(profiles.get_uint("max-jobs", "anyone").unwrap(), 6);
}

#[test]
fn group_sections_only_apply_to_members() {
    let profiles = load(
        "[@science]\n\
         allow-containers = true\n",
    );

    assert!(profiles.get_bool("allow-containers", "alice").unwrap());
    assert!(matches!(
        profiles.get_bool("allow-containers", "bob"),
        Err(ProfilesError::MissingValue { .. })
    ));
}

#[test]
fn unknown_field_is_fatal_at_load_time() {
    let groups = FakeGroups::new(&[]);
    let err = UserProfiles::load("[*]\nbogus = 1\n", &fields(&["max-jobs"]), &groups).unwrap_err();

    assert!(matches!(err, ProfilesError::UnknownField { name, line: 2 } if name == "bogus"));
}

#[test]
fn value_outside_a_section_is_a_parse_error() {
    let groups = FakeGroups::new(&[]);
    let err = UserProfiles::load("max-jobs = 1\n", &fields(&["max-jobs"]), &groups).unwrap_err();

    assert!(matches!(err, ProfilesError::Parse { line: 1, .. }));
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let profiles = load(
        "# leading comment\n\
         \n\
         [*]\n\
         ; another comment\n\
         max-jobs = 3\n",
    );

    assert_eq!(profiles.get_uint("max-jobs", "bob").unwrap(), 3);
}

#[test]
fn typed_getters_parse_and_reject() {
    let profiles = load(
        "[*]\n\
         max-jobs = 4\n\
         allow-containers = yes\n\
         cpu-share = 0.5\n\
         default-queues = a, b , a\n\
         limits = cpu=2;mem=4G\n",
    );

    assert_eq!(profiles.get_int("max-jobs", "x").unwrap(), 4);
    assert!(profiles.get_bool("allow-containers", "x").unwrap());
    assert_eq!(profiles.get_double("cpu-share", "x").unwrap(), 0.5);
    assert_eq!(profiles.get_string_list("default-queues", "x").unwrap(), vec!["a", "b", "a"]);
    assert_eq!(profiles.get_string_set("default-queues", "x").unwrap().len(), 2);

    let limits = profiles.get_string_map("limits", "x").unwrap();
    assert_eq!(limits["cpu"], "2");
    assert_eq!(limits["mem"], "4G");

    assert!(matches!(
        profiles.get_uint("allow-containers", "x"),
        Err(ProfilesError::TypeMismatch { expected: "uint", .. })
    ));
}
