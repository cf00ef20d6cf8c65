//! Intent categories and their exhaustive heuristic profile.
//!
//! Every per-category table (weights, minimum score, structural queries, keyword
//! group, acceptance rules) is a `match` over [`Category`], so adding a category
//! fails to compile until each table covers it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::similarity::normalize_text;

/// Abstract UI intent the engine resolves to a live node
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Category {
    #[serde(rename = "email")]
    #[value(name = "email")]
    Email,
    #[serde(rename = "password")]
    #[value(name = "password")]
    Password,
    #[serde(rename = "search")]
    #[value(name = "search")]
    Search,
    #[serde(rename = "button")]
    #[value(name = "button")]
    Button,
    #[serde(rename = "add_to_cart")]
    #[value(name = "add_to_cart")]
    AddToCart,
    #[serde(rename = "cart")]
    #[value(name = "cart")]
    Cart,
    #[serde(rename = "checkout")]
    #[value(name = "checkout")]
    Checkout,
    #[serde(rename = "login_btn")]
    #[value(name = "login_btn")]
    LoginBtn,
    #[serde(rename = "text_input")]
    #[value(name = "text_input")]
    TextInput,
    #[serde(rename = "firstName")]
    #[value(name = "firstName")]
    FirstName,
    #[serde(rename = "lastName")]
    #[value(name = "lastName")]
    LastName,
    #[serde(rename = "phone")]
    #[value(name = "phone")]
    Phone,
    #[serde(rename = "signup")]
    #[value(name = "signup")]
    Signup,
}

/// Per-category weight vector; components always sum to 1.0
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeights {
    pub visual: f64,
    pub semantic: f64,
    pub location: f64,
    pub tag: f64,
}

impl CategoryWeights {
    /// Used by categories without a tuned vector
    pub const DEFAULT: CategoryWeights = CategoryWeights::new(0.30, 0.35, 0.15, 0.20);

    const TEXT_ENTRY: CategoryWeights = CategoryWeights::new(0.15, 0.45, 0.15, 0.25);
    const HEADER_CONTROL: CategoryWeights = CategoryWeights::new(0.20, 0.35, 0.30, 0.15);
    const COMMIT_BUTTON: CategoryWeights = CategoryWeights::new(0.25, 0.45, 0.15, 0.15);

    pub const fn new(visual: f64, semantic: f64, location: f64, tag: f64) -> Self {
        Self {
            visual,
            semantic,
            location,
            tag,
        }
    }

    pub fn sum(&self) -> f64 {
        self.visual + self.semantic + self.location + self.tag
    }
}

/// Broad element class used by the wide fallback query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementClass {
    Input,
    Clickable,
    Any,
}

impl ElementClass {
    pub fn xpath(self) -> &'static str {
        match self {
            ElementClass::Input => {
                "//input[not(@type='hidden') and not(@type='submit') and not(@type='button')]"
            }
            ElementClass::Clickable => {
                "//button | //a | //input[@type='submit'] | //*[contains(@class, 'btn')] | //*[contains(@id, 'btn')] | //div[@role='button'] | //span[@role='button'] | //span"
            }
            ElementClass::Any => "//*",
        }
    }
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Email,
        Category::Password,
        Category::Search,
        Category::Button,
        Category::AddToCart,
        Category::Cart,
        Category::Checkout,
        Category::LoginBtn,
        Category::TextInput,
        Category::FirstName,
        Category::LastName,
        Category::Phone,
        Category::Signup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Password => "password",
            Category::Search => "search",
            Category::Button => "button",
            Category::AddToCart => "add_to_cart",
            Category::Cart => "cart",
            Category::Checkout => "checkout",
            Category::LoginBtn => "login_btn",
            Category::TextInput => "text_input",
            Category::FirstName => "firstName",
            Category::LastName => "lastName",
            Category::Phone => "phone",
            Category::Signup => "signup",
        }
    }

    /// Parse the wire name used in file names and the knowledge store
    pub fn from_name(name: &str) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn weights(self) -> CategoryWeights {
        match self {
            Category::Email
            | Category::Password
            | Category::TextInput
            | Category::FirstName
            | Category::LastName
            | Category::Phone => CategoryWeights::TEXT_ENTRY,
            Category::Search => CategoryWeights::new(0.10, 0.40, 0.35, 0.15),
            Category::Button => CategoryWeights::DEFAULT,
            Category::AddToCart => CategoryWeights::new(0.25, 0.50, 0.10, 0.15),
            Category::Cart | Category::LoginBtn => CategoryWeights::HEADER_CONTROL,
            Category::Checkout | Category::Signup => CategoryWeights::COMMIT_BUTTON,
        }
    }

    /// Category-specific minimum final score; `None` uses the configured default
    pub fn min_score(self) -> Option<f64> {
        match self {
            Category::Email | Category::Password => Some(0.25),
            Category::Search => Some(0.10),
            Category::AddToCart | Category::Button | Category::Checkout => Some(0.15),
            Category::Cart => Some(0.20),
            Category::LoginBtn
            | Category::TextInput
            | Category::FirstName
            | Category::LastName
            | Category::Phone
            | Category::Signup => None,
        }
    }

    pub fn is_text_entry(self) -> bool {
        matches!(
            self,
            Category::Email
                | Category::Password
                | Category::Search
                | Category::TextInput
                | Category::FirstName
                | Category::LastName
                | Category::Phone
        )
    }

    pub fn is_click_like(self) -> bool {
        !self.is_text_entry()
    }

    /// Relaxed acceptance: intents where a loose match beats a miss.
    ///
    /// Returns the floor a candidate with this tag must exceed instead of the
    /// category minimum.
    pub fn relaxed_floor(self, tag: &str) -> Option<f64> {
        match self {
            Category::Search if tag == "input" => Some(0.0),
            Category::AddToCart | Category::Checkout
                if matches!(tag, "button" | "a" | "div" | "span") =>
            {
                Some(0.05)
            }
            _ => None,
        }
    }

    pub fn element_class(self) -> ElementClass {
        match self {
            Category::Email
            | Category::Password
            | Category::Search
            | Category::TextInput
            | Category::FirstName
            | Category::LastName
            | Category::Phone => ElementClass::Input,
            Category::Button | Category::AddToCart | Category::LoginBtn | Category::Signup => {
                ElementClass::Clickable
            }
            Category::Cart | Category::Checkout => ElementClass::Any,
        }
    }

    /// Narrow structural queries, tried in order before the wide query
    pub fn narrow_queries(self) -> &'static [&'static str] {
        match self {
            Category::Email => &[
                "//input[@type='email']",
                "//input[contains(@name, 'mail') or contains(@id, 'mail')]",
                "//input[contains(@placeholder, 'mail') or contains(@placeholder, 'posta')]",
                "//input[contains(@autocomplete, 'email')]",
            ],
            Category::Password => &[
                "//input[@type='password']",
                "//input[contains(@name, 'pass') or contains(@id, 'pass')]",
                "//input[contains(@name, 'sifre') or contains(@id, 'sifre')]",
            ],
            Category::Search => &[
                "//input[@type='search']",
                "//input[contains(@name, 'search') or contains(@id, 'search')]",
                "//input[@name='q' or @id='q']",
                "//input[contains(@placeholder, 'ara') or contains(@placeholder, 'search')]",
                "//input[contains(@class, 'search')]",
            ],
            Category::AddToCart => &[
                "//button[contains(translate(., 'SEPETEKLİ', 'sepetekli'), 'sepete ekle')]",
                "//a[contains(., 'Sepete Ekle')]",
                "//button[contains(., 'Hemen Al') or contains(., 'Satın Al')]",
                "//button[contains(., 'Add to Cart') or contains(., 'Buy Now')]",
                "//button[contains(@class, 'add-to-cart') or contains(@class, 'addToCart')]",
                "//button[contains(@class, 'add-basket') or contains(@class, 'addBasket')]",
                "//button[contains(@class, 'buy-now') or contains(@class, 'buyNow')]",
                "//button[@data-testid='add-to-cart']",
                "//*[contains(@class, 'add') and contains(@class, 'cart')]//button",
                "//button[contains(@class, 'btn') and contains(@class, 'cart')]",
            ],
            Category::Cart => &[
                "//a[contains(@href, 'sepet') or contains(@href, 'cart') or contains(@href, 'basket')]",
                "//*[contains(@class, 'cart') or contains(@class, 'basket') or contains(@class, 'sepet')]//a",
                "//*[@id='cart' or @id='basket' or @id='sepet']//a",
                "//a[contains(@class, 'cart')]",
            ],
            Category::LoginBtn => &[
                "//a[contains(@href, 'login') or contains(@href, 'giris')]",
                "//*[contains(@class, 'login') or contains(@class, 'signin')]//a",
                "//a[contains(., 'Giriş') or contains(., 'Login')]",
            ],
            Category::Checkout => &[
                "//button[contains(., 'Tamamla') or contains(., 'Onayla')]",
                "//button[contains(., 'Ödeme')]",
                "//a[contains(., 'Satın Al') or contains(., 'Ödeme')]",
                "//button[contains(., 'Checkout') or contains(., 'Complete') or contains(., 'Proceed')]",
                "//button[contains(@class, 'checkout') or contains(@class, 'confirm')]",
                "//button[contains(@class, 'complete') or contains(@class, 'proceed')]",
            ],
            Category::Button
            | Category::TextInput
            | Category::FirstName
            | Category::LastName
            | Category::Phone
            | Category::Signup => &[],
        }
    }

    pub fn keyword_group(self) -> KeywordGroup {
        match self {
            Category::Email => KeywordGroup::Email,
            Category::Password => KeywordGroup::Password,
            Category::Search => KeywordGroup::Search,
            Category::Button => KeywordGroup::Submit,
            Category::AddToCart => KeywordGroup::AddToCart,
            Category::Cart => KeywordGroup::Cart,
            Category::Checkout => KeywordGroup::Checkout,
            Category::LoginBtn => KeywordGroup::Login,
            Category::TextInput => KeywordGroup::TextInput,
            Category::FirstName => KeywordGroup::FirstName,
            Category::LastName => KeywordGroup::LastName,
            Category::Phone => KeywordGroup::Phone,
            Category::Signup => KeywordGroup::Signup,
        }
    }

    /// Categories whose harvested crops are worth keeping as references
    pub fn is_capture_priority(self) -> bool {
        matches!(
            self,
            Category::Email
                | Category::Password
                | Category::Button
                | Category::Search
                | Category::AddToCart
                | Category::Checkout
        )
    }

    /// Intents that have alternative recovery strategies
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Category::Cart
                | Category::AddToCart
                | Category::LoginBtn
                | Category::Search
                | Category::Checkout
        )
    }

    /// Hint text used when typing into a text-entry category without one
    pub fn default_hint(self) -> &'static str {
        match self {
            Category::Email => "E-Posta",
            Category::Password => "Şifre",
            Category::Search => "Ara",
            Category::TextInput => "Metin",
            Category::FirstName => "İsim",
            Category::LastName => "Soyisim",
            Category::Phone => "Telefon",
            Category::Button => "Button",
            Category::AddToCart => "Sepete Ekle",
            Category::Cart => "Sepetim",
            Category::Checkout => "Alışverişi Tamamla",
            Category::LoginBtn => "Giriş Yap",
            Category::Signup => "Üye Ol",
        }
    }

    /// Infer the category from free text such as a button label.
    ///
    /// Most specific phrases are checked first; unknown text is a generic button.
    pub fn detect(hint: &str) -> Category {
        let text = normalize_text(hint);
        if text.is_empty() {
            return Category::Button;
        }
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));
        let has_word = |words: &[&str]| text.split(' ').any(|t| words.contains(&t));

        if has(&["sepete ekle", "add to cart", "hemen al"]) {
            Category::AddToCart
        } else if has(&["sepet", "cart", "basket"]) {
            Category::Cart
        } else if has(&["e-posta", "email", "mail"]) {
            Category::Email
        } else if has(&["şifre", "sifre", "password", "parola"]) {
            Category::Password
        } else if has(&["telefon", "phone", "gsm"]) {
            Category::Phone
        } else if has(&["soyad", "surname", "soyisim"]) {
            Category::LastName
        } else if has(&["isim", "name"]) || has_word(&["ad"]) {
            Category::TextInput
        } else if has(&["onayla", "tamamla", "checkout", "ödeme"]) {
            Category::Checkout
        } else if has(&["search"]) || has_word(&["ara", "bul"]) {
            Category::Search
        } else {
            // Login and signup labels are form submits here, not the header nav link
            Category::Button
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Category::from_name(s).ok_or_else(|| anyhow::anyhow!("Unknown category: {}", s))
    }
}

/// Keyword vocabulary used for semantic scoring.
///
/// Decoupled from [`Category`] because a generic button may be a login, signup
/// or submit control depending on its hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeywordGroup {
    Login,
    Signup,
    Submit,
    Email,
    Password,
    TextInput,
    FirstName,
    LastName,
    Phone,
    Search,
    AddToCart,
    Cart,
    Checkout,
}

impl KeywordGroup {
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            KeywordGroup::Login => &[
                "giriş", "giris", "login", "sign in", "üye girişi", "uye girisi", "oturum aç",
                "tamam", "devam",
            ],
            KeywordGroup::Signup => &[
                "üye ol", "uye ol", "kayıt ol", "sign up", "register", "hesap oluştur",
            ],
            KeywordGroup::Submit => &[
                "gönder", "tamam", "onayla", "devam et", "kaydet", "giriş yap",
            ],
            KeywordGroup::Email => &[
                "e-posta", "eposta", "email", "mail", "kullanıcı adı", "username", "adresiniz",
            ],
            KeywordGroup::Password => &["şifre", "sifre", "parola", "password", "pass", "key"],
            KeywordGroup::TextInput => &[
                "isim", "ad", "name", "soyad", "soyisim", "surname", "telefon", "phone", "gsm",
                "cep",
            ],
            KeywordGroup::FirstName => &["isim", "ad", "name", "first"],
            KeywordGroup::LastName => &["soyad", "soyisim", "surname", "last"],
            KeywordGroup::Phone => &["telefon", "phone", "gsm", "cep", "mobile"],
            KeywordGroup::Search => &["ara", "search", "bul", "ürün ara", "marka ara", "kategori ara"],
            KeywordGroup::AddToCart => &[
                "sepete ekle", "add to cart", "sepete at", "hemen al", "satın al", "buy now",
                "sepet", "ekle", "add", "buy", "satın", "basket", "cart",
            ],
            KeywordGroup::Cart => &["sepetim", "sepet", "cart", "my cart", "basket", "sepetiniz"],
            KeywordGroup::Checkout => &[
                "sepeti onayla", "alışverişi tamamla", "satın al", "ödeme yap", "checkout",
                "confirm cart", "devam et", "onayla", "tamamla", "siparişi tamamla", "öde",
                "sipariş", "confirm", "complete", "proceed",
            ],
        }
    }

    /// Phrases whose presence is a much stronger signal than any keyword
    pub fn strong_phrases(self) -> (&'static [&'static str], f64) {
        match self {
            KeywordGroup::AddToCart => (&["sepete ekle", "add to cart"], 3.0),
            KeywordGroup::Checkout => (&["alışverişi tamamla", "ödeme"], 2.5),
            _ => (&[], 1.0),
        }
    }

    /// Pick the vocabulary for a hint, falling back to the category's own
    pub fn for_hint(hint: Option<&str>, category: Category) -> KeywordGroup {
        let Some(hint) = hint.map(normalize_text).filter(|h| !h.is_empty()) else {
            return category.keyword_group();
        };
        let has = |needles: &[&str]| needles.iter().any(|n| hint.contains(n));
        let has_word = |words: &[&str]| hint.split(' ').any(|t| words.contains(&t));

        if has(&["posta", "email", "mail"]) {
            KeywordGroup::Email
        } else if has(&["şifre", "sifre", "pass", "parola"]) {
            KeywordGroup::Password
        } else if has(&["telefon", "phone", "gsm"]) {
            KeywordGroup::Phone
        } else if has(&["sepete ekle", "add to cart", "hemen al"]) {
            KeywordGroup::AddToCart
        } else if has(&["sepet", "cart", "basket"]) {
            KeywordGroup::Cart
        } else if has(&["onayla", "tamamla", "checkout", "satın", "ödeme"]) {
            KeywordGroup::Checkout
        } else if has(&["iriş", "iris", "ogin", "sign in"]) {
            KeywordGroup::Login
        } else if has(&["üye", "uye", "kayıt", "register", "sign up"]) {
            KeywordGroup::Signup
        } else if has(&["search"]) || has_word(&["ara", "bul"]) {
            KeywordGroup::Search
        } else if has(&["soyad", "soyisim", "surname"]) {
            KeywordGroup::LastName
        } else if has(&["isim", "name"]) || has_word(&["ad"]) {
            KeywordGroup::TextInput
        } else if has(&["ekle", "add"]) {
            KeywordGroup::AddToCart
        } else {
            category.keyword_group()
        }
    }
}

#[cfg(test)]
#[path = "category_test.rs"]
mod category_test;
