// Unit tests for the reference repository

use super::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn test_file_name_round_trip() {
    let name = ReferenceImage::file_name(
        &Subject::Category(Category::AddToCart),
        Provenance::Auto,
        "n11",
        82,
        1_700_000_000_123,
    );
    assert_eq!(name, "add_to_cart__auto__n11__82pct__1700000000123.png");

    let parsed = ReferenceImage::parse(Path::new(&name)).unwrap();
    assert_eq!(parsed.subject, Subject::Category(Category::AddToCart));
    assert_eq!(parsed.provenance, Provenance::Auto);
    assert_eq!(parsed.site, "n11");
    assert_eq!(parsed.confidence_pct, 82);
    assert_eq!(parsed.timestamp_ms, 1_700_000_000_123);
    assert!((parsed.confidence() - 0.82).abs() < 1e-9);
}

#[test]
fn test_named_subjects_are_sanitized() {
    let subject = Subject::named("login button__");
    assert_eq!(subject, Subject::Named("login-button".to_string()));

    let name = ReferenceImage::file_name(&subject, Provenance::Golden, "www.site.test", 100, 5);
    let parsed = ReferenceImage::parse(Path::new(&name)).unwrap();
    assert_eq!(parsed.subject, subject);
    assert_eq!(parsed.site, "www.site.test");
    assert_eq!(parsed.category(), None);
}

#[test]
fn test_foreign_files_are_ignored() {
    assert!(ReferenceImage::parse(Path::new("email.png")).is_none());
    assert!(ReferenceImage::parse(Path::new("email__auto__n11__80pct__1.jpg")).is_none());
    assert!(ReferenceImage::parse(Path::new("bogus__auto__n11__80pct__1.png")).is_none());
    assert!(ReferenceImage::parse(Path::new("email__other__n11__80pct__1.png")).is_none());
}

#[test]
fn test_missing_directory_lists_empty() {
    let dir = TempDir::new().unwrap();
    let store = ReferenceStore::new(dir.path().join("absent"));
    assert!(store.list().unwrap().is_empty());
    assert!(store.golden("login").unwrap().is_none());
}

#[test]
fn test_save_and_query_by_provenance() {
    let dir = TempDir::new().unwrap();
    let store = ReferenceStore::new(dir.path());
    let email = Subject::Category(Category::Email);

    let first = store.save(&email, Provenance::Auto, "n11", 0.81, b"one").unwrap();
    let second = store.save(&email, Provenance::Auto, "trendyol", 0.75, b"two").unwrap();
    store.save(&email, Provenance::Curated, "any", 1.0, b"three").unwrap();
    store
        .save(&Subject::named("login"), Provenance::Golden, "n11", 1.0, b"gold")
        .unwrap();

    assert_eq!(store.list().unwrap().len(), 4);

    let auto = store.pool(Category::Email, Provenance::Auto).unwrap();
    assert_eq!(auto.len(), 2);
    // Newest first
    assert_eq!(auto[0].path, second.path);
    assert_eq!(auto[1].path, first.path);
    assert_eq!(store.read(&auto[1]).unwrap(), b"one");

    assert_eq!(store.recent(Category::Email, Provenance::Auto, 1).unwrap().len(), 1);
    assert_eq!(store.pool(Category::Email, Provenance::Curated).unwrap().len(), 1);
    assert!(store.pool(Category::Search, Provenance::Auto).unwrap().is_empty());

    let golden = store.golden("login").unwrap().unwrap();
    assert_eq!(store.read(&golden).unwrap(), b"gold");
}

#[test]
fn test_save_leaves_no_temporary_files() {
    let dir = TempDir::new().unwrap();
    let store = ReferenceStore::new(dir.path());
    store
        .save(&Subject::Category(Category::Cart), Provenance::Auto, "n11", 0.9, b"png")
        .unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[test]
fn test_confidence_is_rounded_to_whole_percent() {
    let dir = TempDir::new().unwrap();
    let store = ReferenceStore::new(dir.path());
    let subject = Subject::Category(Category::Email);

    let low = store.save(&subject, Provenance::Auto, "n11", 0.29, b"a").unwrap();
    assert_eq!(low.confidence_pct, 29);
    let high = store.save(&subject, Provenance::Auto, "n11", 0.956, b"b").unwrap();
    assert_eq!(high.confidence_pct, 96);
}
