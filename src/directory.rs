use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::persistence::PersistenceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Professional,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Professional => "professional",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "professional" => Ok(Role::Professional),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Identity facts the engine trusts for role checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: Role,
}

impl User {
    pub fn new(id: i64, name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            name: name.into(),
            role,
        }
    }
}

/// A bookable service (e.g. general medicine, dental).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    /// Free-form category, mirrors the clinic's service type column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Service {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: None,
        }
    }
}

/// A physical facility where appointments take place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Facility {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: None,
        }
    }
}

/// Lookup of users, services and facilities owned by the hosting application.
pub trait Directory: Send + Sync {
    fn user(&self, id: i64) -> PersistenceResult<Option<User>>;
    fn service(&self, id: i64) -> PersistenceResult<Option<Service>>;
    fn facility(&self, id: i64) -> PersistenceResult<Option<Facility>>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<i64, User>>,
    services: RwLock<HashMap<i64, Service>>,
    facilities: RwLock<HashMap<i64, Facility>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    pub fn add_service(&self, service: Service) {
        self.services.write().insert(service.id, service);
    }

    pub fn add_facility(&self, facility: Facility) {
        self.facilities.write().insert(facility.id, facility);
    }

    pub fn with_user(self, user: User) -> Self {
        self.add_user(user);
        self
    }

    pub fn with_service(self, service: Service) -> Self {
        self.add_service(service);
        self
    }

    pub fn with_facility(self, facility: Facility) -> Self {
        self.add_facility(facility);
        self
    }
}

impl Directory for InMemoryDirectory {
    fn user(&self, id: i64) -> PersistenceResult<Option<User>> {
        Ok(self.users.read().get(&id).cloned())
    }

    fn service(&self, id: i64) -> PersistenceResult<Option<Service>> {
        Ok(self.services.read().get(&id).cloned())
    }

    fn facility(&self, id: i64) -> PersistenceResult<Option<Facility>> {
        Ok(self.facilities.read().get(&id).cloned())
    }
}
