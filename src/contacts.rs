use std::collections::BTreeSet;

use crate::models::Person;

/// Index character for names that start with a symbol (or are empty)
pub const SYMBOL_INDEX: char = '/';
/// Index character for names that start with a digit
pub const NUMBER_INDEX: char = '#';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStatus {
    #[default]
    None,
    Sending,
    Accepting,
    Ignoring,
    Revoking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactItem {
    pub person: Person,
    pub is_active: bool,
    pub request_status: RequestStatus,
}

impl ContactItem {
    pub fn new(person: Person) -> Self {
        ContactItem {
            person,
            is_active: false,
            request_status: RequestStatus::None,
        }
    }

    fn first_char(&self) -> Option<char> {
        self.person.name.chars().next()
    }
}

/// Contacts sorted by name, unique by person id
#[derive(Debug, Clone, Default)]
pub struct ContactList {
    items: Vec<ContactItem>,
}

impl ContactList {
    pub fn new() -> Self {
        ContactList { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remove_all(&mut self) {
        self.items.clear();
    }

    pub fn append(&mut self, persons: Vec<Person>) {
        for person in persons {
            if !self.items.iter().any(|item| item.person.id == person.id) {
                self.items.push(ContactItem::new(person));
            }
        }
        self.items
            .sort_by_cached_key(|item| item.person.name.to_lowercase());
    }

    pub fn remove(&mut self, person_id: &str) {
        if let Some(index) = self.position(person_id) {
            self.items.remove(index);
        }
    }

    pub fn item(&self, index: usize) -> Option<&ContactItem> {
        self.items.get(index)
    }

    pub fn update_active_status(&mut self, person_id: &str, is_active: bool) -> Option<usize> {
        let index = self.position(person_id)?;
        self.items[index].is_active = is_active;
        Some(index)
    }

    pub fn update_request_status(&mut self, person_id: &str, status: RequestStatus) -> Option<usize> {
        let index = self.position(person_id)?;
        self.items[index].request_status = status;
        Some(index)
    }

    /// Characters for a section index: `/` and `#` first when present, then
    /// the distinct leading letters in order.
    pub fn index_chars(&self) -> Vec<char> {
        let mut letters = BTreeSet::new();
        let mut has_number = false;
        let mut has_symbol = false;

        for item in &self.items {
            match item.first_char() {
                Some(ch) if ch.is_alphabetic() => {
                    letters.extend(ch.to_uppercase());
                }
                Some(ch) if ch.is_numeric() => has_number = true,
                _ => has_symbol = true,
            }
        }

        let mut chars = Vec::with_capacity(letters.len() + 2);
        if has_symbol {
            chars.push(SYMBOL_INDEX);
        }
        if has_number {
            chars.push(NUMBER_INDEX);
        }
        chars.extend(letters);
        chars
    }

    /// Position of the first contact filed under `index_char`
    pub fn index_for(&self, index_char: char) -> Option<usize> {
        self.items.iter().position(|item| {
            let first = item.first_char();
            match index_char {
                SYMBOL_INDEX => first.map_or(true, |ch| !ch.is_alphanumeric()),
                NUMBER_INDEX => first.map_or(false, |ch| ch.is_numeric()),
                letter => first.map_or(false, |ch| {
                    ch.to_uppercase().eq(letter.to_uppercase())
                }),
            }
        })
    }

    fn position(&self, person_id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.person.id == person_id)
    }
}
