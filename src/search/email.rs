use once_cell::sync::Lazy;
use regex::Regex;

pub trait EmailValidator: Send + Sync {
    fn is_valid(&self, email: &str) -> bool;
}

static EMAIL_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,64}$").ok()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexEmailValidator;

impl EmailValidator for RegexEmailValidator {
    fn is_valid(&self, email: &str) -> bool {
        match EMAIL_PATTERN.as_ref() {
            Some(pattern) => pattern.is_match(email),
            None => false,
        }
    }
}
