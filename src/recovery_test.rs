// Unit tests for recovery building blocks; the strategy chain itself is
// exercised against a fake page in tests/recovery_test.rs

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_context_carries_search_term_for_typing() {
    let typing = RecoveryContext::for_action(&Action::Type("laptop".to_string()));
    assert_eq!(typing.search_term.as_deref(), Some("laptop"));

    let clicking = RecoveryContext::for_action(&Action::Click).with_base_url("https://www.n11.com/");
    assert_eq!(clicking.search_term, None);
    assert_eq!(clicking.base_url.as_deref(), Some("https://www.n11.com/"));
}

#[test]
fn test_phrases_pick_their_category() {
    assert_eq!(ResolveAndAct::click_phrase("Hemen Al").category, Category::AddToCart);
    assert_eq!(ResolveAndAct::click_phrase("basket").category, Category::Cart);
    assert_eq!(ResolveAndAct::click_phrase("Tamamla").category, Category::Checkout);
    assert_eq!(ResolveAndAct::click_phrase("Sign In").category, Category::Button);
}

#[test]
fn test_strategy_descriptions() {
    let retry = ResolveAndAct::click_phrase("Sepete Ekle");
    assert_eq!(retry.describe(), "click add_to_cart 'Sepete Ekle'");

    let typing = ResolveAndAct::new(Category::Search, None, Action::Type("x".to_string()));
    assert_eq!(typing.describe(), "type into search");
}

#[test]
fn test_template_query_is_encoded() {
    assert_eq!(fill_template("/sepetim", None), "/sepetim");
    assert_eq!(
        fill_template("/arama?q={query}", Some("oyun bilgisayarı")),
        "/arama?q=oyun+bilgisayar%C4%B1"
    );
}
