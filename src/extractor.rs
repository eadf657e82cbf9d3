use once_cell::sync::Lazy;
use regex::Regex;

// International prefix or a French-style leading 0 followed by a non-zero digit.
static PHONE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\+\d{1,3}|0[1-9])").expect("phone prefix pattern"));
static POSTAL_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{5}\b").expect("postal code pattern"));

/// Sorts the text lines of a listing's detail view into phone and address.
pub struct Extractor {
    country_hint: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ContactFields {
    pub phone: String,
    pub address: String,
}

impl Extractor {
    pub fn new(country_hint: impl Into<String>) -> Self {
        Extractor {
            country_hint: country_hint.into(),
        }
    }

    /// The first line that looks like a phone wins, then the first line that
    /// looks like an address. Everything else is ignored.
    pub fn classify<'a, I>(&self, lines: I) -> ContactFields
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fields = ContactFields::default();
        for line in lines.into_iter().map(str::trim).filter(|l| !l.is_empty()) {
            if fields.phone.is_empty() && self.is_phone(line) {
                fields.phone = line.to_string();
            } else if fields.address.is_empty() && self.is_address(line) {
                fields.address = line.to_string();
            }
        }
        fields
    }

    pub fn is_phone(&self, text: &str) -> bool {
        if !PHONE_PREFIX.is_match(text) {
            return false;
        }
        let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
        (9..=13).contains(&digits) && text.chars().all(|c| c.is_ascii_digit() || " +.-()".contains(c))
    }

    pub fn is_address(&self, text: &str) -> bool {
        (!self.country_hint.is_empty() && text.contains(&self.country_hint)) || POSTAL_CODE.is_match(text)
    }
}
