use log::info;
use std::sync::Arc;

use crate::models::Person;
use crate::remote::{PersonWriter, PersonsQuery, RemoteError, RemoteResult};

/// Profile operations on behalf of the signed-in person
pub struct PersonService {
    me_id: String,
    persons: Arc<dyn PersonsQuery>,
    writer: Arc<dyn PersonWriter>,
}

impl PersonService {
    pub fn new(me_id: &str, persons: Arc<dyn PersonsQuery>, writer: Arc<dyn PersonWriter>) -> Self {
        PersonService {
            me_id: me_id.to_string(),
            persons,
            writer,
        }
    }

    pub fn from_backend<B>(me_id: &str, backend: B) -> Self
    where
        B: PersonsQuery + PersonWriter + 'static,
    {
        let backend = Arc::new(backend);
        PersonService::new(me_id, backend.clone(), backend)
    }

    pub async fn add(&self, email: &str, id: &str) -> RemoteResult<String> {
        self.writer.add(email, id).await?;
        Ok("OK".to_string())
    }

    pub async fn get_profile(&self, person_id: &str) -> RemoteResult<Person> {
        if person_id.is_empty() {
            return Err(RemoteError::InvalidInput("person ID is empty".to_string()));
        }

        let ids = [person_id.to_string()];
        self.persons
            .get_persons(&ids)
            .await
            .into_iter()
            .find(|person| person.id == person_id)
            .ok_or_else(|| RemoteError::NotFound("person not found".to_string()))
    }

    pub async fn get_my_profile(&self) -> RemoteResult<Person> {
        self.get_profile(&self.me_id).await
    }

    pub async fn save_my_info(&self, new_value: Person, old_value: Person) -> RemoteResult<Person> {
        if self.me_id.is_empty() {
            return Err(RemoteError::InvalidInput("current user ID is empty".to_string()));
        }
        if old_value.id != self.me_id {
            return Err(RemoteError::InvalidInput("old personal info is not yours".to_string()));
        }
        if new_value.id != self.me_id {
            return Err(RemoteError::InvalidInput("new personal info is not yours".to_string()));
        }
        if new_value.display_name.is_empty() && new_value.name.is_empty() {
            return Err(RemoteError::InvalidInput("chika name and display name are empty".to_string()));
        }
        if new_value.display_name.is_empty() {
            return Err(RemoteError::InvalidInput("display name is empty".to_string()));
        }
        if new_value.name.is_empty() {
            return Err(RemoteError::InvalidInput("chika name is empty".to_string()));
        }

        self.writer.save_info(&new_value, &old_value).await?;
        info!("Saved profile of {}", self.me_id);
        Ok(new_value)
    }
}
