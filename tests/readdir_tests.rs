//! Directory-merge behavior: listings union both backings, each name served
//! by the side that would actually handle it, exactly once.

mod common;

use std::collections::HashSet;
use std::fs;

use common::TestMount;

/// A name present on both sides appears exactly once in the merged listing.
#[test]
fn merged_listing_has_no_duplicates() {
    let mount = TestMount::with_setup(&["shared/hot"], |base, alt| {
        fs::create_dir_all(base.join("shared")).unwrap();
        fs::write(base.join("shared/cold"), b"base").unwrap();
        fs::create_dir_all(base.join("shared/hot")).unwrap();
        fs::create_dir_all(alt.join("shared/hot")).unwrap();
        fs::write(alt.join("shared/hot/k"), b"alt").unwrap();
    });
    let Some(mount) = mount else { return };

    let names = mount.list("shared").unwrap();
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(names.len(), unique.len(), "duplicate names in {names:?}");

    // "hot" is served from alt, "cold" from base; both show up once.
    assert!(names.contains(&"hot".to_string()));
    assert!(names.contains(&"cold".to_string()));
}

/// Alt contributes only the entries that are actually routed to it; stray
/// alt-side files outside every prefix stay invisible.
#[test]
fn alt_entries_outside_prefixes_are_invisible() {
    let mount = TestMount::with_setup(&["special"], |_base, alt| {
        fs::create_dir_all(alt.join("special")).unwrap();
        fs::write(alt.join("special/visible"), b"1").unwrap();
        fs::write(alt.join("stray"), b"2").unwrap();
    });
    let Some(mount) = mount else { return };

    let root = mount.list(".").unwrap();
    assert!(root.contains(&"special".to_string()));
    assert!(!root.contains(&"stray".to_string()));

    // The stray file is not reachable by lookup either: its path routes to
    // base, where it does not exist.
    assert!(!mount.mpath("stray").exists());
}

/// Base entries under a redirected prefix are masked, even when the alt
/// side is missing the directory content.
#[test]
fn base_entries_under_prefix_are_masked() {
    let mount = TestMount::with_setup(&["cache"], |base, alt| {
        fs::create_dir_all(base.join("cache")).unwrap();
        fs::write(base.join("cache/old"), b"hidden").unwrap();
        fs::create_dir_all(alt.join("cache")).unwrap();
    });
    let Some(mount) = mount else { return };

    assert_eq!(mount.list("cache").unwrap(), Vec::<String>::new());
    assert!(!mount.mpath("cache/old").exists());
}

/// Every name resolvable through the mount shows up in its parent listing.
#[test]
fn listing_is_complete() {
    let mount = TestMount::with_setup(&["special"], |base, alt| {
        fs::write(base.join("plain"), b"1").unwrap();
        fs::create_dir_all(base.join("nested")).unwrap();
        fs::create_dir_all(alt.join("special")).unwrap();
        fs::write(alt.join("special/routed"), b"2").unwrap();
    });
    let Some(mount) = mount else { return };

    let root = mount.list(".").unwrap();
    for name in ["plain", "nested", "special"] {
        assert!(
            mount.mpath(name).exists(),
            "{name} should resolve through the mount"
        );
        assert!(root.contains(&name.to_string()), "{name} missing from {root:?}");
    }
    assert!(mount
        .list("special")
        .unwrap()
        .contains(&"routed".to_string()));
}

/// A directory absent from both backings is no such entry.
#[test]
fn listing_missing_directory_fails() {
    let Some(mount) = TestMount::new(&["special"]) else {
        return;
    };

    let err = fs::read_dir(mount.mpath("nonexistent")).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

/// A directory that exists only on the routed side lists that side's
/// content, filtered to the names routed there.
#[test]
fn alt_only_directory_lists_alt_content() {
    let mount = TestMount::with_setup(&["special"], |_base, alt| {
        fs::create_dir_all(alt.join("special/deep")).unwrap();
        fs::write(alt.join("special/file"), b"x").unwrap();
    });
    let Some(mount) = mount else { return };

    let mut names = mount.list("special").unwrap();
    names.sort();
    assert_eq!(names, vec!["deep".to_string(), "file".to_string()]);
}

/// Listings degrade gracefully on large directories (the merge reuses one
/// scratch buffer and the kernel pages through offsets).
#[test]
fn large_directory_lists_every_entry() {
    let Some(mount) = TestMount::new(&[]) else {
        return;
    };

    for i in 0..500 {
        mount.write(&format!("entry-{i:03}"), b"").unwrap();
    }

    let names = mount.list(".").unwrap();
    assert_eq!(names.len(), 500);
    assert!(names.contains(&"entry-000".to_string()));
    assert!(names.contains(&"entry-499".to_string()));
}
