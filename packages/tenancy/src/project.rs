//! Projects and environments.
//!
//! Organizations own projects; projects own environments drawn from a fixed
//! name set. Environment names gate approval policy (production requires
//! stricter approval capability).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::OrgId;
use crate::gateway::{GatewayError, TenantSession};

/// The fixed environment name set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentName {
    Production,
    Staging,
    Development,
    Sandbox,
}

impl EnvironmentName {
    /// Whether this environment carries production approval requirements.
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Staging => write!(f, "staging"),
            Self::Development => write!(f, "development"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

impl std::str::FromStr for EnvironmentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            "sandbox" => Ok(Self::Sandbox),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// A project within an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub org_id: OrgId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An environment within a project. Unique `(project, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: Uuid,
    pub org_id: OrgId,
    pub project_id: Uuid,
    pub name: EnvironmentName,
    pub created_at: DateTime<Utc>,
}

/// Project errors.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project {0} not found")]
    NotFound(Uuid),
    #[error("environment '{name}' already exists in project {project_id}")]
    EnvironmentExists { project_id: Uuid, name: EnvironmentName },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Store for projects and their environments.
#[derive(Clone, Default)]
pub struct ProjectStore {
    projects: Arc<RwLock<HashMap<OrgId, HashMap<Uuid, Project>>>>,
    environments: Arc<RwLock<HashMap<Uuid, Vec<Environment>>>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a project in the session's organization.
    pub fn create_project(&self, session: &TenantSession, name: impl Into<String>) -> Project {
        let project = Project {
            id: Uuid::new_v4(),
            org_id: session.org_id(),
            name: name.into(),
            created_at: Utc::now(),
        };
        self.projects
            .write()
            .entry(session.org_id())
            .or_default()
            .insert(project.id, project.clone());
        project
    }

    /// Add an environment to a project. Unique per `(project, name)`.
    pub fn add_environment(
        &self,
        session: &TenantSession,
        project_id: Uuid,
        name: EnvironmentName,
    ) -> Result<Environment, ProjectError> {
        let projects = self.projects.read();
        let project = projects
            .get(&session.org_id())
            .and_then(|m| m.get(&project_id))
            .ok_or(ProjectError::NotFound(project_id))?;
        session.check_row(project.org_id)?;
        drop(projects);

        let mut environments = self.environments.write();
        let envs = environments.entry(project_id).or_default();
        if envs.iter().any(|e| e.name == name) {
            return Err(ProjectError::EnvironmentExists { project_id, name });
        }

        let environment = Environment {
            id: Uuid::new_v4(),
            org_id: session.org_id(),
            project_id,
            name,
            created_at: Utc::now(),
        };
        envs.push(environment.clone());
        Ok(environment)
    }

    /// Environments of a project.
    pub fn environments(&self, session: &TenantSession, project_id: Uuid) -> Vec<Environment> {
        self.environments
            .read()
            .get(&project_id)
            .map(|envs| {
                envs.iter()
                    .filter(|e| session.check_row(e.org_id).is_ok())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Projects of the session's organization.
    pub fn projects(&self, session: &TenantSession) -> Vec<Project> {
        self.projects
            .read()
            .get(&session.org_id())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ActorIdentity, TenantContext};
    use crate::gateway::RlsGateway;
    use crate::org::OrganizationDirectory;

    fn session() -> TenantSession {
        let dir = OrganizationDirectory::new();
        let org = dir.register("acme", "Acme").unwrap();
        RlsGateway::new(dir)
            .session(&TenantContext::new(org.id, ActorIdentity::user("alice")))
            .unwrap()
    }

    #[test]
    fn test_environment_unique_per_project() {
        let store = ProjectStore::new();
        let session = session();
        let project = store.create_project(&session, "web");

        store
            .add_environment(&session, project.id, EnvironmentName::Production)
            .unwrap();
        let err = store
            .add_environment(&session, project.id, EnvironmentName::Production)
            .unwrap_err();
        assert!(matches!(err, ProjectError::EnvironmentExists { .. }));

        store
            .add_environment(&session, project.id, EnvironmentName::Staging)
            .unwrap();
        assert_eq!(store.environments(&session, project.id).len(), 2);
    }

    #[test]
    fn test_environment_name_parse() {
        assert_eq!(
            "production".parse::<EnvironmentName>().unwrap(),
            EnvironmentName::Production
        );
        assert!("prod".parse::<EnvironmentName>().is_err());
        assert!(EnvironmentName::Production.is_production());
        assert!(!EnvironmentName::Sandbox.is_production());
    }
}
