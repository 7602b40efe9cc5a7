use std::{path::PathBuf, time::UNIX_EPOCH};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderName, StatusCode},
};
use serde::{Deserialize, Serialize};

use crate::engine::{
    compiler::QueryLimits,
    error::EngineError,
    metadata::{EntityModel, MetadataProvider, MetadataSource, TenantId},
    permissions::Permission,
};

use super::client::HttpBackend;

/// Connection details of the SQL gateway the engine executes against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// The url of the SQL gateway
    pub url: String,
    /// The gateway user name
    pub username: String,
    /// The gateway password
    pub password: String,
}

pub struct AppState {
    pub metadata: MetadataProvider<FileMetadataSource>,
    pub backend: HttpBackend,
    pub limits: QueryLimits,
}

static TENANT_HEADER: HeaderName = HeaderName::from_static("x-tenant-id");
static PERMISSIONS_HEADER: HeaderName = HeaderName::from_static("x-entity-permissions");
static SELECT_HEADER: HeaderName = HeaderName::from_static("x-query-select");

#[derive(Debug)]
pub struct Tenant(pub TenantId);

/// The caller's permission tuples, forwarded by the authenticating gateway.
/// An absent header reads as an empty set; the engine then refuses the query.
#[derive(Debug)]
pub struct CallerPermissions(pub Vec<Permission>);

/// Oversized select strings arrive through a header instead of the body.
#[derive(Debug)]
pub struct HeaderSelect(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = StatusCode;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(tenant_header) = parts.headers.get(&TENANT_HEADER) {
            let tenant = tenant_header
                .to_str()
                .ok()
                .and_then(|value| value.parse().ok())
                .ok_or(StatusCode::BAD_REQUEST)?;
            Ok(Self(tenant))
        } else {
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerPermissions {
    type Rejection = StatusCode;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(permissions_header) = parts.headers.get(&PERMISSIONS_HEADER) {
            let permissions = serde_json::from_slice(permissions_header.as_bytes())
                .map_err(|_err| StatusCode::BAD_REQUEST)?;
            Ok(Self(permissions))
        } else {
            Ok(Self(vec![]))
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for HeaderSelect {
    type Rejection = StatusCode;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(&SELECT_HEADER) {
            Some(select_header) => {
                let select = select_header
                    .to_str()
                    .map_err(|_err| StatusCode::BAD_REQUEST)?;
                Ok(Self(Some(select.to_owned())))
            }
            None => Ok(Self(None)),
        }
    }
}

/// Loads per-tenant entity models from `<root>/<tenant>.json`. The file's
/// modification time doubles as the definitions-version token, so editing a
/// model file invalidates the cached snapshot on the next request.
pub struct FileMetadataSource {
    root: PathBuf,
}

impl FileMetadataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, tenant: TenantId) -> PathBuf {
        self.root.join(format!("{}.json", tenant))
    }
}

impl MetadataSource for FileMetadataSource {
    fn version(&self, tenant: TenantId) -> Result<String, EngineError> {
        let modified = std::fs::metadata(self.path(tenant))
            .and_then(|meta| meta.modified())
            .map_err(|err| {
                EngineError::Internal(format!("metadata for tenant {}: {}", tenant, err))
            })?;
        let stamp = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Ok(stamp.to_string())
    }

    fn load(&self, tenant: TenantId) -> Result<EntityModel, EngineError> {
        let file = std::fs::File::open(self.path(tenant)).map_err(|err| {
            EngineError::Internal(format!("metadata for tenant {}: {}", tenant, err))
        })?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|err| {
            EngineError::Internal(format!("metadata for tenant {}: {}", tenant, err))
        })
    }
}

impl AppState {
    pub fn new(backend: BackendConfig, metadata_root: PathBuf, limits: QueryLimits) -> Self {
        Self {
            metadata: MetadataProvider::new(FileMetadataSource::new(metadata_root)),
            backend: HttpBackend::new(&backend),
            limits,
        }
    }
}
