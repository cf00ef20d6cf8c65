//! Per-candidate component scores and their weighted fusion.
//!
//! Tag, location and semantic heuristics are pure functions of an
//! [`ElementDescriptor`]; the visual component is computed by the scanner
//! because it needs screenshots.

use crate::category::{Category, CategoryWeights, KeywordGroup};
use crate::config::TierThresholds;
use crate::similarity::{normalize_text, text_similarity};
use crate::types::{ElementDescriptor, ScoreBreakdown};

/// Text that marks a node as something other than the target control
const NEGATIVE_KEYWORDS: &[&str] = &[
    // social login
    "facebook", "google", "apple", "iphone", "twitter", "instagram",
    // help and recovery
    "unuttum", "forgot", "yardım", "help", "sıfırla", "reset",
    // layout
    "footer", "menu", "nav", "header", "sidebar",
    // popups
    "close", "kapat", "popup", "reklam", "modal", "overlay",
    // seller links
    "magaza", "satıcı", "seller", "store",
    // favourites
    "wishlist", "favourite", "favori", "begen", "like", "heart",
    // arrows
    "arrow", "ok", "yon", "chevron", "scroll", "slider",
    // promotions
    "kampanya", "campaign", "banner", "promo",
    "logo", "brand", "marka",
    "mobile", "desktop", "responsive",
    "container", "wrapper", "holder", "box",
    "itemcontainer", "item-container", "product-item", "card-item",
    "image", "img", "photo", "video", "media",
    "category", "kategori", "filter", "filtre", "sort", "sırala",
];

/// Class or id fragments of purely decorative nodes
const DECORATION_KEYWORDS: &[&str] = &[
    "logo", "brand", "marka",
    "mobile", "desktop", "responsive",
    "container", "wrapper", "holder", "item",
    "image", "img", "banner", "slider", "carousel",
    "footer", "nav", "menu", "sidebar",
    "seo", "content", "show", "hide", "toggle",
    "swiper", "slide", "prev", "next",
    "overlay", "modal", "popup", "dialog",
    "social", "share", "facebook", "twitter", "instagram",
    // not plain "ad": it would catch add-to-cart classes
    "advertisement", "sponsor", "adsense", "ad-banner",
];

/// Semantic score of text hitting a negative keyword
pub const NEGATIVE_SEMANTIC: f64 = -0.3;
/// Semantic score of a decorative node
pub const DECORATION_SEMANTIC: f64 = -1.0;

const FUZZY_FLOOR: f64 = 0.3;
const FUZZY_MIN_KEYWORD_LEN: usize = 4;
const SEMANTIC_BONUS_SHARE: f64 = 0.15;
const NEGATIVE_DAMPING: f64 = 0.5;
const PROXIMITY_WINDOW: f64 = 250.0;
const PROXIMITY_NEAR: f64 = 0.3;
const PROXIMITY_FAR: f64 = 0.05;

/// Shape heuristic: how much the node's tag and styling look like the category's control
pub fn tag_score(category: Category, descriptor: &ElementDescriptor) -> f64 {
    let tag = descriptor.tag.to_lowercase();
    let class = descriptor.class.to_lowercase();
    let id = descriptor.id.to_lowercase();

    if category.is_text_entry() {
        return if tag == "input" { 1.0 } else { 0.1 };
    }

    match category {
        Category::LoginBtn => {
            if class.contains("tab") {
                0.1
            } else {
                match tag.as_str() {
                    "a" => 1.0,
                    "span" | "div" => 0.9,
                    "button" => 0.3,
                    _ => 0.2,
                }
            }
        }
        Category::Button | Category::AddToCart => {
            if class.contains("tab") {
                return 0.1;
            }
            if class.contains("arrow") || class.contains("chevron") {
                return 0.05;
            }
            let button_like = class.contains("btn")
                || class.contains("button")
                || id.contains("btn")
                || id.contains("button")
                || class.contains("add");

            match tag.as_str() {
                "button" if descriptor.input_type == "submit" => 1.0,
                "button" => 0.95,
                "div" if button_like => 0.95,
                "a" => 0.9,
                _ if descriptor.role == "button" => 0.8,
                "span" if button_like => 0.8,
                "div" => 0.4,
                _ => 0.2,
            }
        }
        _ => 0.2,
    }
}

/// Screen-band heuristic over the node's vertical position
pub fn location_score(category: Category, y: f64, viewport_height: f64) -> f64 {
    if viewport_height > 0.0 && y > viewport_height * 0.95 {
        return 0.1;
    }

    match category {
        Category::LoginBtn => {
            return if y < 120.0 {
                1.0
            } else if y < 200.0 {
                0.5
            } else {
                0.0
            };
        }
        Category::Search => return if y < 200.0 { 1.0 } else { 0.5 },
        Category::Cart => return if y < 150.0 { 1.0 } else { 0.5 },
        // Form fields do not live in the header
        c if c.is_text_entry() && y < 150.0 => return 0.1,
        _ => {}
    }

    if viewport_height <= 0.0 {
        return 0.7;
    }
    let relative = y / viewport_height;
    if (0.2..=0.6).contains(&relative) {
        1.0
    } else {
        0.7
    }
}

/// Class or id marks the node as decoration; add-to-cart styled classes are exempt
pub fn is_decoration(descriptor: &ElementDescriptor) -> bool {
    let class = descriptor.class.to_lowercase();
    let id = descriptor.id.to_lowercase();
    if class.contains("add") && (class.contains("cart") || class.contains("basket")) {
        return false;
    }
    DECORATION_KEYWORDS
        .iter()
        .any(|k| class.contains(k) || id.contains(k))
}

/// Labels of controls that close cookie banners and campaign popups
const OVERLAY_LABELS: &[&str] = &[
    "kapat", "close", "reddet", "kabul et", "tamam", "anladım", "reject", "accept",
];
const OVERLAY_CLASSES: &[&str] = &["close", "popup", "cookie", "modal", "overlay"];
const OVERLAY_IDS: &[&str] = &["close", "popup", "cookie"];
const OVERLAY_MIN_SIDE: f64 = 10.0;

/// Whether a visible node looks like the dismiss control of an overlay
pub fn is_overlay_control(descriptor: &ElementDescriptor) -> bool {
    if !descriptor.displayed
        || descriptor.width <= OVERLAY_MIN_SIDE
        || descriptor.height <= OVERLAY_MIN_SIDE
    {
        return false;
    }
    let text = normalize_text(&descriptor.text);
    let class = descriptor.class.to_lowercase();
    let id = descriptor.id.to_lowercase();
    matches!(text.as_str(), "x" | "×")
        || OVERLAY_LABELS.iter().any(|k| text.contains(k))
        || OVERLAY_CLASSES.iter().any(|k| class.contains(k))
        || OVERLAY_IDS.iter().any(|k| id.contains(k))
}

/// Keyword match of free text against a vocabulary.
///
/// Exact keyword hits score 1.0, strong phrases more; near misses use fuzzy
/// similarity above a floor; negative keywords score below zero unless a
/// positive keyword is present.
pub fn semantic_score(text: &str, group: KeywordGroup) -> f64 {
    let text = normalize_text(text);
    if text.is_empty() {
        return 0.0;
    }

    let keywords = group.keywords();
    let positive = keywords.iter().any(|k| text.contains(k));
    if !positive && NEGATIVE_KEYWORDS.iter().any(|n| text.contains(n)) {
        return NEGATIVE_SEMANTIC;
    }

    match group {
        KeywordGroup::Cart if text.contains("ekle") || text.contains("add") => return 0.0,
        KeywordGroup::AddToCart if text.contains("git") || text.contains("go") => return 0.0,
        _ => {}
    }

    if positive {
        let (phrases, strength) = group.strong_phrases();
        if phrases.iter().any(|p| text.contains(p)) {
            return strength;
        }
        return 1.0;
    }

    let best = keywords
        .iter()
        .filter(|k| k.chars().count() >= FUZZY_MIN_KEYWORD_LEN)
        .map(|k| text_similarity(&text, k))
        .fold(0.0, f64::max);
    if best > FUZZY_FLOOR { best } else { 0.0 }
}

/// Semantic component for a scanned node: decoration check, then keyword match
/// over all of its human-facing text
pub fn candidate_semantic(
    category: Category,
    hint: Option<&str>,
    descriptor: &ElementDescriptor,
) -> f64 {
    if !category.is_text_entry() && is_decoration(descriptor) {
        return DECORATION_SEMANTIC;
    }
    semantic_score(
        &descriptor.semantic_text(),
        KeywordGroup::for_hint(hint, category),
    )
}

/// Bonus for controls that closely follow the last filled field
pub fn proximity_bonus(y: f64, last_input_y: Option<f64>) -> f64 {
    let Some(reference) = last_input_y else {
        return 0.0;
    };
    let distance = y - reference;
    if distance > 0.0 && distance < PROXIMITY_WINDOW {
        PROXIMITY_NEAR
    } else if distance > PROXIMITY_WINDOW {
        PROXIMITY_FAR
    } else {
        0.0
    }
}

/// Raw component scores before fusion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Components {
    pub visual: f64,
    pub semantic: f64,
    pub location: f64,
    pub tag: f64,
}

/// Weighted fusion with the strong-match bonus, clamped to `[0, 1]` and tiered
pub fn fuse(
    components: Components,
    weights: CategoryWeights,
    bonus: f64,
    tiers: &TierThresholds,
) -> ScoreBreakdown {
    let Components {
        visual,
        semantic,
        location,
        tag,
    } = components;

    let semantic_bonus = (semantic - 1.0).max(0.0) * SEMANTIC_BONUS_SHARE;
    let mut weighted = visual * weights.visual
        + semantic.min(1.0) * weights.semantic
        + location * weights.location
        + tag * weights.tag
        + semantic_bonus;
    if semantic < 0.0 {
        weighted *= NEGATIVE_DAMPING;
    }

    let total = weighted + bonus;
    let final_score = if total.is_finite() {
        total.clamp(0.0, 1.0)
    } else {
        0.0
    };

    ScoreBreakdown {
        visual,
        semantic,
        location,
        tag,
        bonus,
        final_score,
        confidence_tier: tiers.classify(final_score),
    }
}

/// Acceptance rule: the category minimum, or a relaxed floor for intents
/// where a loose match beats a miss
pub fn is_acceptable(category: Category, tag: &str, final_score: f64, default_min: f64) -> bool {
    if let Some(floor) = category.relaxed_floor(&tag.to_lowercase())
        && final_score > floor
    {
        return true;
    }
    final_score >= category.min_score().unwrap_or(default_min)
}

#[cfg(test)]
#[path = "scoring_test.rs"]
mod scoring_test;
