//! Customer-directory client contract (§1: "specified only by its
//! operations"). The directory is an external collaborator — a
//! merchant-platform customer API — so the gateway only depends on
//! this trait; [`HttpDirectoryClient`] is the production adapter
//! (`reqwest`, grounded in the teacher's `otp_delivery.rs` REST-call
//! shape) and [`InMemoryDirectoryClient`] is the test fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::resilience::retry::{retry, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub email: String,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub tag: String,
    pub password_hash: Option<String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Request(String),
    #[error("directory returned an unexpected response: {0}")]
    Decode(String),
}

/// Customer lookups, creation, and metadata updates against the
/// merchant-platform customer directory. Only the operations
/// AuthOrchestrator needs are modeled — this is a boundary contract,
/// not a full directory API client.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Customer>, DirectoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, DirectoryError>;
    async fn find_by_id(&self, customer_id: &str) -> Result<Option<Customer>, DirectoryError>;
    async fn create(&self, new_customer: NewCustomer) -> Result<Customer, DirectoryError>;
    async fn update_metadata(&self, customer_id: &str, metadata: HashMap<String, String>) -> Result<(), DirectoryError>;
}

/// Production directory client: a thin REST wrapper over the
/// merchant platform's customer-search/customer-create endpoints.
pub struct HttpDirectoryClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[derive(Serialize)]
struct CreateCustomerBody<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    tags: &'a [String],
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<&'a str, &'a str>,
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Customer>, DirectoryError> {
        let url = format!("{}/customers/search", self.base_url);
        let response = retry(RetryConfig::default(), || {
            self.client.get(&url).header("Authorization", self.auth_header()).query(&[("phone", phone)]).send()
        })
        .await
        .map_err(|e| DirectoryError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let customers: Vec<Customer> = response.json().await.map_err(|e| DirectoryError::Decode(e.to_string()))?;
        Ok(customers.into_iter().next())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, DirectoryError> {
        let url = format!("{}/customers/search", self.base_url);
        let response = retry(RetryConfig::default(), || {
            self.client.get(&url).header("Authorization", self.auth_header()).query(&[("email", email)]).send()
        })
        .await
        .map_err(|e| DirectoryError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let customers: Vec<Customer> = response.json().await.map_err(|e| DirectoryError::Decode(e.to_string()))?;
        Ok(customers.into_iter().next())
    }

    async fn find_by_id(&self, customer_id: &str) -> Result<Option<Customer>, DirectoryError> {
        let url = format!("{}/customers/{}", self.base_url, customer_id);
        let response = retry(RetryConfig::default(), || {
            self.client.get(&url).header("Authorization", self.auth_header()).send()
        })
        .await
        .map_err(|e| DirectoryError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        response.json().await.map(Some).map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    async fn create(&self, new_customer: NewCustomer) -> Result<Customer, DirectoryError> {
        let url = format!("{}/customers", self.base_url);
        let tags = vec![new_customer.tag.clone()];
        let mut metadata = HashMap::new();
        if let Some(hash) = new_customer.password_hash.as_deref() {
            metadata.insert("password_hash", hash);
        }
        let body = CreateCustomerBody {
            email: &new_customer.email,
            phone: new_customer.phone.as_deref(),
            first_name: new_customer.first_name.as_deref(),
            last_name: new_customer.last_name.as_deref(),
            tags: &tags,
            metadata,
        };
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        response.json().await.map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    async fn update_metadata(&self, customer_id: &str, metadata: HashMap<String, String>) -> Result<(), DirectoryError> {
        let url = format!("{}/customers/{}/metadata", self.base_url, customer_id);
        self.client
            .put(&url)
            .header("Authorization", self.auth_header())
            .json(&metadata)
            .send()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;
        Ok(())
    }
}

/// In-memory fake for tests and local development without a
/// configured directory endpoint.
#[derive(Default)]
pub struct InMemoryDirectoryClient {
    customers: Arc<RwLock<Vec<Customer>>>,
}

impl InMemoryDirectoryClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectoryClient {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Customer>, DirectoryError> {
        Ok(self.customers.read().await.iter().find(|c| c.phone.as_deref() == Some(phone)).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, DirectoryError> {
        Ok(self.customers.read().await.iter().find(|c| c.email == email).cloned())
    }

    async fn find_by_id(&self, customer_id: &str) -> Result<Option<Customer>, DirectoryError> {
        Ok(self.customers.read().await.iter().find(|c| c.id == customer_id).cloned())
    }

    async fn create(&self, new_customer: NewCustomer) -> Result<Customer, DirectoryError> {
        let mut metadata = HashMap::new();
        if let Some(hash) = new_customer.password_hash {
            metadata.insert("password_hash".to_string(), hash);
        }
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            email: new_customer.email,
            phone: new_customer.phone,
            first_name: new_customer.first_name,
            last_name: new_customer.last_name,
            tags: vec![new_customer.tag],
            metadata,
        };
        self.customers.write().await.push(customer.clone());
        Ok(customer)
    }

    async fn update_metadata(&self, customer_id: &str, metadata: HashMap<String, String>) -> Result<(), DirectoryError> {
        let mut customers = self.customers.write().await;
        if let Some(customer) = customers.iter_mut().find(|c| c.id == customer_id) {
            customer.metadata.extend(metadata);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_find_by_phone_round_trips() {
        let client = InMemoryDirectoryClient::new();
        let created = client
            .create(NewCustomer {
                email: "+15551234567@phone.local".to_string(),
                phone: Some("+15551234567".to_string()),
                tag: "sms-auth".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let found = client.find_by_phone("+15551234567").await.unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn update_metadata_merges_into_existing_customer() {
        let client = InMemoryDirectoryClient::new();
        let created = client
            .create(NewCustomer { email: "a@example.com".to_string(), tag: "sms-auth".to_string(), ..Default::default() })
            .await
            .unwrap();

        let mut metadata = HashMap::new();
        metadata.insert("auth_method".to_string(), "sms".to_string());
        client.update_metadata(&created.id, metadata).await.unwrap();

        let found = client.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.metadata.get("auth_method"), Some(&"sms".to_string()));
    }
}
