//! Role → permission matrix.
//!
//! The table is built once at startup (either the built-in default or a JSON
//! file named by `RBAC_POLICY_PATH`) and shared read-only through
//! [`crate::state::AppState`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WILDCARD: &str = "*";

pub const TICKETS_READ: &str = "tickets.read";
pub const TICKETS_WRITE: &str = "tickets.write";
pub const TICKETS_DELETE: &str = "tickets.delete";
pub const USERS_READ: &str = "users.read";
pub const USERS_WRITE: &str = "users.write";
pub const USERS_DELETE: &str = "users.delete";
pub const KNOWLEDGE_BASE_READ: &str = "knowledge_base.read";
pub const KNOWLEDGE_BASE_WRITE: &str = "knowledge_base.write";
pub const KNOWLEDGE_BASE_DELETE: &str = "knowledge_base.delete";
pub const REPORTS_READ: &str = "reports.read";
pub const DASHBOARD_READ: &str = "dashboard.read";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "super_admin")]
    SuperAdmin,
    #[serde(rename = "admin_kota")]
    CityAdmin,
    #[serde(rename = "admin_opd")]
    UnitAdmin,
    #[serde(rename = "agent")]
    Agent,
    #[serde(rename = "technician", alias = "teknisi")]
    Technician,
    #[serde(rename = "user", alias = "pengguna")]
    User,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::SuperAdmin,
        Role::CityAdmin,
        Role::UnitAdmin,
        Role::Agent,
        Role::Technician,
        Role::User,
    ];

    pub const ADMINS: &'static [Role] = &[Role::SuperAdmin, Role::CityAdmin, Role::UnitAdmin];

    pub const TOP_LEVEL_ADMINS: &'static [Role] = &[Role::SuperAdmin, Role::CityAdmin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::CityAdmin => "admin_kota",
            Role::UnitAdmin => "admin_opd",
            Role::Agent => "agent",
            Role::Technician => "technician",
            Role::User => "user",
        }
    }

    pub fn is_top_level_admin(self) -> bool {
        Self::TOP_LEVEL_ADMINS.contains(&self)
    }

    pub fn is_admin(self) -> bool {
        Self::ADMINS.contains(&self)
    }

    /// Everyone who works tickets rather than reporting them.
    pub fn is_staff(self) -> bool {
        self != Role::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "super_admin" => Ok(Role::SuperAdmin),
            "admin_kota" => Ok(Role::CityAdmin),
            "admin_opd" => Ok(Role::UnitAdmin),
            "agent" => Ok(Role::Agent),
            "technician" | "teknisi" => Ok(Role::Technician),
            "user" | "pengguna" => Ok(Role::User),
            _ => Err(UnknownRole(value.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed policy document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    UnknownRole(#[from] UnknownRole),
}

#[derive(Deserialize)]
struct PolicyEntry {
    permissions: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    grants: HashMap<Role, BTreeSet<String>>,
}

impl AccessPolicy {
    /// Parses a document shaped like
    /// `{"admin_opd": {"permissions": ["tickets.read", ...], "description": "..."}}`.
    /// Roles missing from the document get no permissions.
    pub fn from_json(raw: &str) -> Result<Self, PolicyError> {
        let entries: HashMap<String, PolicyEntry> = serde_json::from_str(raw)?;
        let mut grants = HashMap::new();
        for (key, entry) in entries {
            let role: Role = key.parse()?;
            let set = entry
                .permissions
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            grants.insert(role, set);
        }
        Ok(Self { grants })
    }

    pub fn load(path: Option<&str>) -> Result<Self, PolicyError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_json(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn has_permission(&self, role: Role, permission: &str) -> bool {
        self.grants
            .get(&role)
            .map(|set| set.contains(WILDCARD) || set.contains(permission))
            .unwrap_or(false)
    }

    pub fn permissions(&self, role: Role) -> Vec<String> {
        self.grants
            .get(&role)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        let table: [(Role, &[&str]); 6] = [
            (Role::SuperAdmin, &[WILDCARD]),
            (
                Role::CityAdmin,
                &[
                    TICKETS_READ,
                    TICKETS_WRITE,
                    TICKETS_DELETE,
                    USERS_READ,
                    USERS_WRITE,
                    USERS_DELETE,
                    KNOWLEDGE_BASE_READ,
                    KNOWLEDGE_BASE_WRITE,
                    KNOWLEDGE_BASE_DELETE,
                    REPORTS_READ,
                    DASHBOARD_READ,
                ],
            ),
            (
                Role::UnitAdmin,
                &[
                    TICKETS_READ,
                    TICKETS_WRITE,
                    USERS_READ,
                    USERS_WRITE,
                    KNOWLEDGE_BASE_READ,
                    KNOWLEDGE_BASE_WRITE,
                    REPORTS_READ,
                    DASHBOARD_READ,
                ],
            ),
            (
                Role::Agent,
                &[TICKETS_READ, TICKETS_WRITE, KNOWLEDGE_BASE_READ, DASHBOARD_READ],
            ),
            (
                Role::Technician,
                &[TICKETS_READ, TICKETS_WRITE, KNOWLEDGE_BASE_READ, DASHBOARD_READ],
            ),
            (Role::User, &[TICKETS_READ, TICKETS_WRITE, KNOWLEDGE_BASE_READ]),
        ];

        let grants = table
            .into_iter()
            .map(|(role, perms)| (role, perms.iter().map(|p| p.to_string()).collect()))
            .collect();
        Self { grants }
    }
}
