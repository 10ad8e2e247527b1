//! Registry transport over the `oci-distribution` client.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::{CranError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::manifest::{RawManifest, ACCEPTED_MEDIA_TYPES};
use super::reference::ImageReference;
use super::transport::{RegistryAuth, RegistryConnector, RegistryTransport};

/// Opens HTTPS transports; hosts listed as insecure are reached over HTTP.
#[derive(Debug, Clone, Default)]
pub struct OciConnector {
    insecure: Vec<String>,
}

impl OciConnector {
    pub fn new(insecure: Vec<String>) -> Self {
        Self { insecure }
    }
}

impl RegistryConnector for OciConnector {
    fn connect(&self, auth: &RegistryAuth) -> Result<Arc<dyn RegistryTransport>> {
        Ok(Arc::new(OciTransport::new(auth.clone(), &self.insecure)))
    }
}

/// One authenticated `oci-distribution` client.
pub struct OciTransport {
    client: Client,
    auth: RegistryAuth,
}

impl OciTransport {
    pub fn new(auth: RegistryAuth, insecure: &[String]) -> Self {
        let protocol = if insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure.to_vec())
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (self.auth.username(), self.auth.password()) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.to_string(), p.to_string()),
            _ => OciRegistryAuth::Anonymous,
        }
    }

    async fn authorize_push(&self, oci_ref: &Reference, reference: &ImageReference) -> Result<()> {
        self.client
            .auth(oci_ref, &self.to_oci_auth(), RegistryOperation::Push)
            .await
            .map(|_| ())
            .map_err(|e| map_error(reference, "authenticate", e))
    }
}

#[async_trait]
impl RegistryTransport for OciTransport {
    async fn pull_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let oci_ref = to_oci_reference(reference)?;
        let (bytes, _digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &self.to_oci_auth(), &ACCEPTED_MEDIA_TYPES)
            .await
            .map_err(|e| map_error(reference, "pull manifest", e))?;
        RawManifest::sniff(bytes)
    }

    async fn push_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.authorize_push(&oci_ref, reference).await?;
        let content_type = http::HeaderValue::from_str(&manifest.media_type).map_err(|e| {
            CranError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Invalid media type '{}': {}", manifest.media_type, e),
            }
        })?;
        self.client
            .push_manifest_raw(&oci_ref, manifest.bytes.clone(), content_type)
            .await
            .map_err(|e| map_error(reference, "push manifest", e))?;
        Ok(())
    }

    async fn pull_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(reference)?;
        // Blob pulls reuse the token obtained for the repository
        self.client
            .auth(&oci_ref, &self.to_oci_auth(), RegistryOperation::Pull)
            .await
            .map_err(|e| map_error(reference, "authenticate", e))?;
        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &descriptor, &mut data)
            .await
            .map_err(|e| map_error(reference, &format!("pull blob {}", digest), e))?;
        Ok(data)
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.authorize_push(&oci_ref, reference).await?;
        self.client
            .push_blob(&oci_ref, &data, digest)
            .await
            .map_err(|e| map_error(reference, &format!("push blob {}", digest), e))?;
        Ok(())
    }

    async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.to_oci_auth();
        let (client, oci_ref, auth) = (&self.client, &oci_ref, &auth);
        collect_tag_pages(TAG_PAGE_SIZE, move |last: Option<String>| async move {
            client
                .list_tags(oci_ref, auth, Some(TAG_PAGE_SIZE), last.as_deref())
                .await
                .map(|response| response.tags)
                .map_err(|e| map_error(reference, "list tags", e))
        })
        .await
    }
}

const TAG_PAGE_SIZE: usize = 1000;

/// Request tag pages after the last tag seen until a short page arrives.
async fn collect_tag_pages<F, Fut>(page_size: usize, mut fetch: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    let mut tags = Vec::new();
    let mut last: Option<String> = None;
    loop {
        let page = fetch(last.clone()).await?;
        let next = page.last().cloned();
        // A registry that ignores `last` repeats the same page
        if next.is_none() || next == last {
            break;
        }
        let full = page.len() >= page_size;
        tags.extend(page);
        if !full {
            break;
        }
        last = next;
    }
    tracing::trace!(count = tags.len(), "Listed tags");
    Ok(tags)
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| CranError::InvalidReference {
        reference: ref_str.clone(),
        message: e.to_string(),
    })
}

/// Split 404-class responses from every other registry failure.
fn map_error(reference: &ImageReference, action: &str, err: OciDistributionError) -> CranError {
    if is_not_found(&err) {
        return CranError::NotFound(reference.full_reference());
    }
    CranError::RegistryError {
        registry: reference.registry.clone(),
        message: format!("Failed to {} for {}: {}", action, reference, err),
    }
}

fn is_not_found(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown | OciErrorCode::BlobUnknown
            )
        }),
        _ => false,
    }
}
