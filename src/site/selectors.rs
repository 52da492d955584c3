//! Locators for the merchant-offers site.

use crate::browser::Locator;

/// XPath predicate text for a case-insensitive `contains()` on normalized text.
macro_rules! lower {
    ($needle:literal) => {
        concat!(
            "contains(translate(normalize-space(.),'ABCDEFGHIJKLMNOPQRSTUVWXYZ',",
            "'abcdefghijklmnopqrstuvwxyz'),'",
            $needle,
            "')"
        )
    };
}

/// An `a` or `button` whose text contains `$needle`, ignoring case.
macro_rules! control_with_text {
    ($needle:literal) => {
        Locator::XPath(concat!("//*[self::a or self::button][", lower!($needle), "]"))
    };
}

// Offers page state.

pub const OFFER_TILE: Locator = Locator::XPath(
    "//div[contains(@class,'offer-tile') or contains(@class,'mo-offer') \
     or contains(@data-testid,'offer-tile')]",
);
pub const INLINE_ERROR: Locator = Locator::Css("#available-err-msg");
pub const TOAST_ERROR: Locator = Locator::XPath(concat!(
    "//*[",
    lower!("trouble loading your offers"),
    "] | //*[@role='alert' or contains(@class,'alert') or contains(@class,'toast')][",
    lower!("error"),
    "]"
));
pub const NOT_FOUND: Locator = Locator::XPath(concat!(
    "//*[self::h1 or self::h2][",
    lower!("page not found"),
    " or contains(.,'looks like that information isn')]",
    " | //*[contains(@class,'notFound') or contains(@class,'not-found') or contains(@class,'error')]",
    "[contains(.,'Page not found')]"
));
pub const RETURN_TO_ACCOUNT: Locator = control_with_text!("return to your account");

/// Popup dismissal controls, scanned in order.
pub const POPUP_DISMISS: [Locator; 6] = [
    control_with_text!("no thanks"),
    control_with_text!("not now"),
    control_with_text!("skip"),
    control_with_text!("dismiss"),
    Locator::XPath("//*[@role='dialog']//button[@aria-label='Close' or contains(@class,'close')]"),
    Locator::XPath("//button[@aria-label='Close' or contains(@class,'close')]"),
];

// In-app navigation.

pub const REWARDS_MENU: Locator = control_with_text!("rewards & offers");
pub const MERCHANT_OFFERS_LINK: Locator = Locator::XPath(concat!(
    "//*[self::a or self::button][",
    lower!("merchant offers"),
    " or ",
    lower!("offers for you"),
    " or contains(@href,'merchantoffers')]"
));
pub const OFFERS_HREF_LINK: Locator = Locator::XPath("//a[contains(@href,'merchantoffers')]");

pub const TAB_ENROLLED: Locator = Locator::XPath("//a[normalize-space()='Enrolled']");
pub const TAB_ALL: Locator = Locator::XPath("//a[normalize-space()='All']");

// Login form.

pub const USERNAME_FIELDS: [Locator; 3] = [
    Locator::Css("#username, input[name='username']"),
    Locator::Css("#userId, input[name='userId']"),
    Locator::Css("input[placeholder*='User'][type='text']"),
];
pub const PASSWORD_FIELDS: [Locator; 4] = [
    Locator::Css("#password, input[name='password']"),
    Locator::Css("#pwd"),
    Locator::Css("input[type='password']"),
    Locator::Css("#citi-input2-0"),
];
/// Wrapper that has to be clicked before the password input accepts focus.
pub const PASSWORD_WRAPPER: Locator = Locator::XPath(
    "//input[@id='password' or @name='password' or @id='citi-input2-0' or @id='pwd']\
     /ancestor::*[contains(@class,'input-switch-wrapper')]",
);
pub const SIGN_ON_BUTTONS: [Locator; 2] = [
    Locator::XPath(concat!("//button[", lower!("sign on"), "]")),
    Locator::Css("button[type='submit']"),
];

// Card dropdown.

pub const CARD_DROPDOWN_BUTTON: Locator =
    Locator::XPath("//button[@id='cds-dropdown' and contains(@class,'cds-dd2-button')]");
pub const CARD_OPTIONS: Locator =
    Locator::XPath("//ul[@id='cds-dropdown-listbox']/li[not(contains(@class,'disabled'))]");
pub const CARD_LABEL: Locator = Locator::Css("div#cds-dropdown-button-value.cds-dd2-pseudo-value");

// Offer list and detail dialog.

pub const ENROLL_ICON: Locator =
    Locator::XPath("//cds-icon[@name='plus-circle' and @arialabel='Enroll']");
pub const SHOW_MORE: Locator = Locator::XPath(concat!(
    "//button[",
    lower!("show more"),
    " or ",
    lower!("load more"),
    "]"
));
pub const ENROLLED_TILE: Locator = Locator::XPath("//div[contains(@class,'enrolled')]");
pub const ENROLLMENT_ERROR: Locator = Locator::XPath(
    "//*[contains(.,'Unable to enroll merchant offer') and (self::div or self::span or self::p)]",
);

pub const MODAL_MERCHANT_NAME: Locator = Locator::Css(".mo-modal-img-merchant-name");
pub const MODAL_OFFER_TITLE: Locator = Locator::Css(".mo-modal-offer-title div");
pub const MODAL_BODY: Locator = Locator::Css("cds-column section");
pub const MODAL_EXPIRATION: Locator = Locator::Css(".mo-modal-header-date span");
pub const MODAL_CLOSE_BUTTONS: [Locator; 4] = [
    Locator::XPath("//button[contains(text(),'Close')]"),
    Locator::XPath("//button[@aria-label='Close']"),
    Locator::XPath("//button[contains(@class,'cds-modal-close')]"),
    Locator::XPath("//cds-icon/ancestor::button"),
];

pub const PAGE_BODY: Locator = Locator::Css("body");
