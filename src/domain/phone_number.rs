const DEFAULT_COUNTRY_CODE: &str = "1";
const MIN_DIGITS: usize = 11;
const MAX_DIGITS: usize = 13;

/// A phone number in canonical form: `+` followed by the country code and
/// subscriber number, 11 to 13 digits in total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(number: String) -> Result<PhoneNumber, String> {
        let cleaned = clean_phone_number(&number);

        if !is_clean_phone_number(&cleaned) {
            return Err(format!("{} is not a valid phone number", number));
        }

        Ok(Self(cleaned))
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strips everything but `+` and digits, adding a country code when the
/// digit count makes one obvious. Input that can't be turned into a number is
/// returned untouched so that validation rejects it.
pub fn clean_phone_number(number: &str) -> String {
    if number.is_empty() {
        return String::new();
    }

    let stripped: String = number
        .chars()
        .filter(|c| *c == '+' || c.is_ascii_digit())
        .collect();

    if stripped.is_empty() {
        return number.to_string();
    }

    if stripped.starts_with('+') {
        return stripped;
    }

    match stripped.len() {
        10 => format!("+{}{}", DEFAULT_COUNTRY_CODE, stripped),
        11..=13 => format!("+{}", stripped),
        _ => number.to_string(),
    }
}

pub fn is_clean_phone_number(number: &str) -> bool {
    match number.strip_prefix('+') {
        Some(digits) => {
            (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len())
                && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
