// Scanning, ranking and caching against an in-memory page
use anyhow::Result;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

use intentprobe::{
    Category, ConfidenceTier, ElementDescriptor, ProbeError, Provenance, ReferenceStore,
    ScrollTarget, SimilarityService, Subject,
};
use intentprobe::learning::{ActionType, LearningStore};
use intentprobe::session::{OVERLAY_QUERY, SCROLL_STEP_PX};

mod common;
use common::{FakePage, ScriptedModel, config_in, element, png, session, session_with};

const SEARCH_QUERY: &str = "//input[@type='search']";
const EMAIL_QUERY: &str = "//input[@type='email']";
const PASSWORD_QUERY: &str = "//input[@type='password']";
const ADD_TO_CART_QUERY: &str =
    "//button[contains(translate(., 'SEPETEKLİ', 'sepetekli'), 'sepete ekle')]";

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn search_box() -> ElementDescriptor {
    ElementDescriptor {
        input_type: "search".to_string(),
        placeholder: "Ürün ara".to_string(),
        ..element("input", "q", 60.0)
    }
}

fn labelled(tag: &str, id: &str, text: &str, y: f64) -> ElementDescriptor {
    ElementDescriptor {
        text: text.to_string(),
        ..element(tag, id, y)
    }
}

fn save_reference(
    config: &intentprobe::EngineConfig,
    category: Category,
    provenance: Provenance,
    bytes: &[u8],
) -> Result<()> {
    ReferenceStore::new(config.references_dir()).save(
        &Subject::Category(category),
        provenance,
        "any",
        1.0,
        bytes,
    )?;
    Ok(())
}

fn email_field(id: &str) -> ElementDescriptor {
    ElementDescriptor {
        input_type: "email".to_string(),
        ..element("input", id, 300.0)
    }
}

#[tokio::test]
async fn test_search_input_resolves_with_high_confidence() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let id = page.add(search_box(), &[]);
    page.route(SEARCH_QUERY, &[id]);

    let mut session = session(page, &dir);
    let candidate = session.resolve(Category::Search, None).await?;

    assert_eq!(candidate.node, id);
    assert!(!candidate.from_cache);
    // semantic 1.0, location 1.0, tag 1.0, no references for the visual part
    assert!(approx(candidate.score.visual, 0.0));
    assert!(approx(candidate.final_score(), 0.9));
    assert_eq!(candidate.tier(), ConfidenceTier::High);
    Ok(())
}

#[tokio::test]
async fn test_repeat_resolution_is_served_from_cache() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let id = page.add(search_box(), &[]);
    page.route(SEARCH_QUERY, &[id]);

    let mut session = session(page, &dir);
    let first = session.resolve(Category::Search, None).await?;
    let finds = session.driver().finds();

    let second = session.resolve(Category::Search, None).await?;
    assert_eq!(second.node, first.node);
    assert!(second.from_cache);
    assert_eq!(second.score, first.score);
    assert_eq!(session.driver().finds(), finds, "cache hit must not query the page");

    let stats = session.stats();
    assert_eq!(stats.scans, 1);
    assert_eq!(stats.cache_hits, 1);
    Ok(())
}

#[tokio::test]
async fn test_hidden_cached_winner_triggers_rescan() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let best = page.add(search_box(), &[]);
    let fallback = page.add(
        ElementDescriptor {
            input_type: "search".to_string(),
            ..element("input", "q2", 120.0)
        },
        &[],
    );
    page.route(SEARCH_QUERY, &[best, fallback]);

    let mut session = session(page, &dir);
    assert_eq!(session.resolve(Category::Search, None).await?.node, best);

    session.driver().set_displayed(best, false);
    let candidate = session.resolve(Category::Search, None).await?;
    assert_eq!(candidate.node, fallback);
    assert!(!candidate.from_cache);
    assert_eq!(session.stats().scans, 2);
    assert_eq!(session.stats().cache_hits, 0);
    Ok(())
}

#[tokio::test]
async fn test_navigation_clears_cached_winners() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let id = page.add(search_box(), &[]);
    page.route(SEARCH_QUERY, &[id]);

    let mut session = session(page, &dir);
    session.resolve(Category::Search, None).await?;
    session.goto("https://shop.test/").await?;
    let candidate = session.resolve(Category::Search, None).await?;

    assert!(!candidate.from_cache);
    assert_eq!(session.stats().scans, 2);
    Ok(())
}

#[tokio::test]
async fn test_previous_click_target_is_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/p/1");
    let first = page.add(
        ElementDescriptor {
            text: "Sepete Ekle".to_string(),
            ..element("button", "buy-1", 300.0)
        },
        &[],
    );
    let second = page.add(
        ElementDescriptor {
            text: "Sepete Ekle".to_string(),
            ..element("button", "buy-2", 400.0)
        },
        &[],
    );
    page.route(ADD_TO_CART_QUERY, &[first, second]);
    page.route(Category::Button.element_class().xpath(), &[first, second]);

    let mut session = session(page, &dir);
    session.click_intent("Sepete Ekle").await?;
    assert_eq!(session.driver().clicks(), vec![first]);

    let next = session.resolve(Category::Button, Some("Sepete Ekle")).await?;
    assert_eq!(next.node, second);
    Ok(())
}

#[tokio::test]
async fn test_prefilled_password_is_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/login");
    let filled = page.add(
        ElementDescriptor {
            input_type: "password".to_string(),
            value: "hunter2".to_string(),
            ..element("input", "pass1", 300.0)
        },
        &[],
    );
    let empty = page.add(
        ElementDescriptor {
            input_type: "password".to_string(),
            ..element("input", "pass2", 350.0)
        },
        &[],
    );
    page.route(PASSWORD_QUERY, &[filled, empty]);

    let mut session = session(page, &dir);
    let candidate = session.resolve(Category::Password, None).await?;
    assert_eq!(candidate.node, empty);
    Ok(())
}

#[tokio::test]
async fn test_visual_similarity_breaks_semantic_tie() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    let reference = png(32, 32, [200, 30, 30]);
    ReferenceStore::new(config.references_dir()).save(
        &Subject::Category(Category::Email),
        Provenance::Curated,
        "any",
        1.0,
        &reference,
    )?;

    let unlike = png(32, 32, [0, 0, 0]);
    let alike = png(32, 32, [190, 40, 30]);
    let page = FakePage::new("https://shop.test/login");
    let a = page.add(email_field("f1"), &unlike);
    let b = page.add(email_field("f2"), &alike);
    page.route(EMAIL_QUERY, &[a, b]);

    let model = ScriptedModel::new(0.1).score(&alike, 0.9);
    let mut session = session_with(page, config, model);
    let candidate = session.resolve(Category::Email, None).await?;

    assert_eq!(candidate.node, b);
    assert!(approx(candidate.score.visual, 0.9));
    assert!(candidate.final_score() < 0.7);
    Ok(())
}

#[tokio::test]
async fn test_missing_model_uses_fallback_visual_score() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    ReferenceStore::new(config.references_dir()).save(
        &Subject::Category(Category::Email),
        Provenance::Curated,
        "any",
        1.0,
        &png(16, 16, [255, 255, 255]),
    )?;

    let page = FakePage::new("https://shop.test/login");
    let id = page.add(email_field("f1"), &png(16, 16, [0, 0, 0]));
    page.route(EMAIL_QUERY, &[id]);

    let mut session =
        intentprobe::Session::with_similarity(page, config, SimilarityService::without_model());
    let candidate = session.resolve(Category::Email, None).await?;
    assert!(approx(
        candidate.score.visual,
        session.config().scan.visual_fallback
    ));
    Ok(())
}

#[tokio::test]
async fn test_learned_fingerprint_wins_a_tie() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    let labelled = |id: &str| ElementDescriptor {
        placeholder: "E-posta".to_string(),
        ..email_field(id)
    };

    let mut store = LearningStore::load(config.knowledge_file());
    store.record_success("shop.test", Category::Email, &labelled("beta"), ActionType::Type, 0.85);
    store.save()?;

    let page = FakePage::new("https://shop.test/login");
    let alpha = page.add(labelled("alpha"), &[]);
    let beta = page.add(labelled("beta"), &[]);
    page.route(EMAIL_QUERY, &[alpha, beta]);

    let mut session = intentprobe::Session::new(page, config);
    let candidate = session.resolve(Category::Email, None).await?;
    assert_eq!(candidate.node, beta);
    assert!(approx(candidate.score.bonus, 0.10));
    Ok(())
}

#[tokio::test]
async fn test_scrolling_reveals_lazy_content() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let id = page.add(search_box(), &[]);
    page.reveal_on_scroll(SEARCH_QUERY, &[id]);

    let mut session = session(page, &dir);
    let candidate = session
        .resolve_with_scrolling(Category::Search, None, 2)
        .await?;

    assert_eq!(candidate.node, id);
    assert_eq!(
        session.driver().scrolls(),
        vec![ScrollTarget::By(SCROLL_STEP_PX)]
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_page_reports_not_found() -> Result<()> {
    let dir = TempDir::new()?;
    let mut session = session(FakePage::new("https://shop.test/"), &dir);

    let err = session
        .resolve_with_scrolling(Category::Email, None, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::NotFound { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(session.driver().scrolls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_typing_a_search_submits_it() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let id = page.add(search_box(), &[]);
    page.route(SEARCH_QUERY, &[id]);

    let mut session = session(page, &dir);
    session.type_intent(Category::Search, "laptop").await?;

    assert_eq!(session.driver().typed(), vec![(id, "laptop".to_string())]);
    assert_eq!(session.driver().submits(), vec![id]);
    assert_eq!(session.stats().recoveries, 0);
    Ok(())
}

#[tokio::test]
async fn test_waits_are_soft() -> Result<()> {
    let dir = TempDir::new()?;
    let session = session(FakePage::new("https://shop.test/"), &dir);

    assert!(session.wait_for_page_ready(Duration::from_millis(20)).await);
    assert!(!session.wait_for_address_change(Duration::from_millis(20)).await);
    Ok(())
}

#[tokio::test]
async fn test_different_hints_on_one_page_pick_different_buttons() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/account");
    let login = page.add(labelled("button", "login", "Giriş Yap", 300.0), &[]);
    let save = page.add(labelled("button", "save", "Kaydet", 300.0), &[]);
    page.route(Category::Button.element_class().xpath(), &[login, save]);

    let mut session = session(page, &dir);
    session.click_intent("Giriş Yap").await?;
    session.click_intent("Kaydet").await?;

    assert_eq!(session.driver().clicks(), vec![login, save]);
    assert_eq!(session.stats().scans, 2);
    assert_eq!(session.stats().cache_hits, 0);
    Ok(())
}

#[tokio::test]
async fn test_cached_winner_respects_loop_guard() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/account");
    let login = page.add(labelled("button", "login", "Giriş Yap", 300.0), &[]);
    let save = page.add(labelled("button", "save", "Kaydet", 300.0), &[]);
    page.route(Category::Button.element_class().xpath(), &[login, save]);

    let mut session = session(page, &dir);
    session.click_intent("Giriş Yap").await?;

    // Same hint, same page: the cached winner was just clicked
    let next = session.resolve(Category::Button, Some("Giriş Yap")).await?;
    assert_eq!(next.node, save);
    assert!(!next.from_cache);
    assert_eq!(session.stats().cache_hits, 0);
    Ok(())
}

#[tokio::test]
async fn test_weak_leader_is_reranked_against_auto_references() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    save_reference(&config, Category::Email, Provenance::Auto, &png(32, 32, [10, 120, 200]))?;

    let unlike = png(32, 32, [0, 0, 0]);
    let alike = png(32, 32, [20, 110, 190]);
    let page = FakePage::new("https://shop.test/login");
    let a = page.add(email_field("f1"), &unlike);
    let b = page.add(email_field("f2"), &alike);
    page.route(EMAIL_QUERY, &[a, b]);

    let model = ScriptedModel::new(0.1).score(&alike, 0.9);
    let calls = model.calls();
    let mut session = session_with(page, config, model);
    let candidate = session.resolve(Category::Email, None).await?;

    // No curated references: both tie at 0.40 until the auto pool is consulted
    assert_eq!(candidate.node, b);
    assert!(approx(candidate.score.visual, 0.9));
    assert!(approx(candidate.score.bonus, 0.36));
    assert!(approx(candidate.final_score(), 0.76));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_strong_semantic_match_skips_visual_analysis() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    save_reference(&config, Category::AddToCart, Provenance::Curated, &png(16, 16, [0, 200, 0]))?;

    let page = FakePage::new("https://shop.test/p/1");
    let id = page.add(labelled("button", "buy", "Sepete Ekle", 300.0), &[]);
    page.route(ADD_TO_CART_QUERY, &[id]);

    let model = ScriptedModel::new(0.0);
    let calls = model.calls();
    let mut session = session_with(page, config, model);
    let candidate = session.resolve(Category::AddToCart, None).await?;

    assert!(approx(candidate.score.visual, session.config().scan.neutral_visual));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_visual_analysis_is_capped_per_scan() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config_in(&dir);
    config.scan.visual_candidate_cap = 1;
    save_reference(&config, Category::Email, Provenance::Curated, &png(16, 16, [200, 0, 0]))?;
    save_reference(&config, Category::Email, Provenance::Curated, &png(16, 16, [0, 0, 200]))?;

    let unlike = png(16, 16, [0, 0, 0]);
    let alike = png(16, 16, [190, 10, 10]);
    let page = FakePage::new("https://shop.test/login");
    let first = page.add(email_field("f1"), &unlike);
    let second = page.add(email_field("f2"), &alike);
    page.route(EMAIL_QUERY, &[first, second]);

    let model = ScriptedModel::new(0.1).score(&alike, 0.9);
    let calls = model.calls();
    let mut session = session_with(page, config, model);
    let candidate = session.resolve(Category::Email, None).await?;

    // Only the first node is compared, against both references
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(candidate.node, second);
    assert!(approx(candidate.score.visual, session.config().scan.visual_fallback));
    Ok(())
}

#[tokio::test]
async fn test_visual_comparison_stops_at_a_close_match() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    save_reference(&config, Category::Email, Provenance::Curated, &png(16, 16, [200, 0, 0]))?;
    save_reference(&config, Category::Email, Provenance::Curated, &png(16, 16, [0, 0, 200]))?;

    let alike = png(16, 16, [190, 10, 10]);
    let page = FakePage::new("https://shop.test/login");
    let id = page.add(email_field("f1"), &alike);
    page.route(EMAIL_QUERY, &[id]);

    let model = ScriptedModel::new(0.1).score(&alike, 0.9);
    let calls = model.calls();
    let mut session = session_with(page, config, model);
    let candidate = session.resolve(Category::Email, None).await?;

    assert!(approx(candidate.score.visual, 0.9));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_empty_narrow_queries_fall_back_to_wide_query() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/login");
    let id = page.add(
        ElementDescriptor {
            input_type: "text".to_string(),
            ..element("input", "f1", 300.0)
        },
        &[],
    );
    page.route(Category::Email.element_class().xpath(), &[id]);

    let mut session = session(page, &dir);
    let candidate = session.resolve(Category::Email, None).await?;

    assert_eq!(candidate.node, id);
    assert_eq!(
        session.driver().finds(),
        Category::Email.narrow_queries().len() + 1
    );
    Ok(())
}

#[tokio::test]
async fn test_button_below_filled_field_gets_proximity_bonus() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/login");
    let field = page.add(email_field("f1"), &[]);
    let above = page.add(labelled("button", "send-a", "Gönder", 200.0), &[]);
    let below = page.add(labelled("button", "send-b", "Gönder", 450.0), &[]);
    page.route(EMAIL_QUERY, &[field]);
    page.route(Category::Button.element_class().xpath(), &[above, below]);

    let mut session = session(page, &dir);
    session.type_intent(Category::Email, "user@shop.test").await?;
    let candidate = session.resolve(Category::Button, None).await?;

    assert_eq!(candidate.node, below);
    assert!(approx(candidate.score.bonus, 0.3));
    Ok(())
}

#[tokio::test]
async fn test_search_submit_leaves_no_proximity_anchor() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let search = page.add(search_box(), &[]);
    let button = page.add(labelled("button", "send", "Gönder", 200.0), &[]);
    page.route(SEARCH_QUERY, &[search]);
    page.route(Category::Button.element_class().xpath(), &[button]);

    let mut session = session(page, &dir);
    session.type_intent(Category::Search, "laptop").await?;
    let candidate = session.resolve(Category::Button, None).await?;

    assert_eq!(candidate.node, button);
    assert!(approx(candidate.score.bonus, 0.0));
    Ok(())
}

#[tokio::test]
async fn test_overlays_are_dismissed_before_resolving() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePage::new("https://shop.test/");
    let search = page.add(search_box(), &[]);
    let cookie = page.add(labelled("button", "cookie-accept", "Kabul Et", 700.0), &[]);
    let buy = page.add(labelled("button", "buy", "Sepete Ekle", 300.0), &[]);
    let hidden = page.add(labelled("button", "promo", "Kapat", 100.0), &[]);
    page.set_displayed(hidden, false);
    page.route(SEARCH_QUERY, &[search]);
    page.route(OVERLAY_QUERY, &[buy, cookie, hidden]);

    let mut session = session(page, &dir);
    session.resolve(Category::Search, None).await?;

    assert_eq!(session.dismiss_overlays().await, 1);
    assert_eq!(session.driver().clicks(), vec![cookie]);

    // Closing a popup invalidates what was resolved underneath it
    let candidate = session.resolve(Category::Search, None).await?;
    assert!(!candidate.from_cache);
    Ok(())
}

#[tokio::test]
async fn test_page_without_overlays_is_left_alone() -> Result<()> {
    let dir = TempDir::new()?;
    let mut session = session(FakePage::new("https://shop.test/"), &dir);

    assert_eq!(session.dismiss_overlays().await, 0);
    assert!(session.driver().clicks().is_empty());
    Ok(())
}
