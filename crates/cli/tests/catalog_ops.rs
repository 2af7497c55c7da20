//! Catalog store behavior against a real temporary directory.

use burrow_cli::store::CatalogStore;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> CatalogStore {
	CatalogStore::open(dir.path().join("catalog.json")).unwrap()
}

#[test]
fn catalog_round_trips_through_disk() {
	let dir = TempDir::new().unwrap();

	let mut store = open_store(&dir);
	store.add_group("work", Some("client A")).unwrap();
	store.add_proxy("socks5://u:p@10.0.0.1:1080", None).unwrap();
	store
		.add_profile("abc123", Some("work"), Some("socks5://u:p@10.0.0.1:1080"), None)
		.unwrap();
	store.save().unwrap();

	let reopened = open_store(&dir);
	let profile = reopened.profile_by_name("abc123").unwrap();
	assert_eq!(profile.group_name.as_deref(), Some("work"));
	assert_eq!(profile.proxy_name.as_deref(), Some("socks5://u:p@10.0.0.1:1080"));
}

#[test]
fn duplicate_and_invalid_names_are_rejected() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	store.add_profile("abc123", None, None, None).unwrap();
	assert!(store.add_profile("abc123", None, None, None).is_err());
	assert!(store.add_profile("Bad Name", None, None, None).is_err());
	assert!(store.add_profile("../escape", None, None, None).is_err());
}

#[test]
fn references_must_resolve_at_insert_time() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	assert!(store.add_profile("abc123", Some("nope"), None, None).is_err());
	assert!(store.add_profile("abc123", None, Some("socks5://h:1080"), None).is_err());

	store.add_proxy("socks5://h:1080", None).unwrap();
	store.add_profile("abc123", None, Some("socks5://h:1080"), None).unwrap();
}

#[test]
fn malformed_proxy_is_rejected_at_storage() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	assert!(store.add_proxy("ftp://host:21", None).is_err());
	assert!(store.add_proxy("host:1080", None).is_err());
	assert!(store.add_proxy("socks5://host:70000", None).is_err());
}

#[test]
fn bulk_add_generates_distinct_resolvable_names() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	store.add_group("farm", None).unwrap();
	let names = store.bulk_add_profiles(20, Some("farm"), None).unwrap();
	assert_eq!(names.len(), 20);
	for name in &names {
		let profile = store.profile_by_name(name).unwrap();
		assert_eq!(profile.group_name.as_deref(), Some("farm"));
	}
	// Another batch avoids names from the first.
	let more = store.bulk_add_profiles(20, None, None).unwrap();
	for name in &more {
		assert!(!names.contains(name));
	}
}

#[test]
fn removing_group_ungroups_its_profiles() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	store.add_group("work", None).unwrap();
	store.add_profile("abc123", Some("work"), None, None).unwrap();
	store.remove_group("work").unwrap();

	let profile = store.profile_by_name("abc123").unwrap();
	assert!(profile.group_name.is_none());
	assert!(store.list_profiles(Some("work")).is_empty());
}

#[test]
fn removing_proxy_detaches_profiles() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	store.add_proxy("http://h:8080", None).unwrap();
	store.add_profile("abc123", None, Some("http://h:8080"), None).unwrap();
	store.remove_proxy("http://h:8080").unwrap();

	let profile = store.profile_by_name("abc123").unwrap();
	assert!(profile.proxy_name.is_none());
	assert!(store.proxy_by_url("http://h:8080").is_none());
}

#[test]
fn update_repoints_and_clears_references() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	store.add_group("work", None).unwrap();
	store.add_proxy("socks5://h:1080", None).unwrap();
	store.add_profile("abc123", None, None, None).unwrap();

	let updated = store
		.update_profile("abc123", Some("work"), Some("socks5://h:1080"), Some("client A"))
		.unwrap();
	assert_eq!(updated.group_name.as_deref(), Some("work"));
	assert_eq!(updated.proxy_name.as_deref(), Some("socks5://h:1080"));
	assert_eq!(updated.remark.as_deref(), Some("client A"));

	// Empty string clears a reference.
	let cleared = store.update_profile("abc123", Some(""), Some(""), None).unwrap();
	assert!(cleared.group_name.is_none());
	assert!(cleared.proxy_name.is_none());
	assert_eq!(cleared.remark.as_deref(), Some("client A"));
}

#[test]
fn group_filter_with_unknown_group_matches_nothing() {
	let dir = TempDir::new().unwrap();
	let mut store = open_store(&dir);

	store.add_profile("abc123", None, None, None).unwrap();
	assert_eq!(store.list_profiles(None).len(), 1);
	assert!(store.list_profiles(Some("ghost")).is_empty());
}

#[test]
fn profiles_root_sits_next_to_catalog() {
	let dir = TempDir::new().unwrap();
	let store = open_store(&dir);
	assert_eq!(store.profiles_root(), dir.path().join("profiles"));
}
