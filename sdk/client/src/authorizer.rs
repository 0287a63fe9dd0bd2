//! Decryption authorization cache.
//!
//! Produces and caches the viewer-signed, time-bounded credential that lets
//! a ciphertext be re-encrypted to the viewer. The signature request is an
//! interactive, user-approved step, so concurrent requests for the same
//! (viewer, contract) key coalesce onto one shared in-flight future, so the
//! viewer is never prompted twice at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info};
use thiserror::Error;

use cipherscore_fhe::authorization::unix_now;
use cipherscore_fhe::{Address, DecryptionAuthorization, Keypair};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The viewer rejected the interactive signature prompt.
    #[error("viewer declined the decryption authorization request")]
    UserDeclined,

    /// The signer failed for a non-interactive reason.
    #[error("authorization signer failed: {0}")]
    Signer(String),
}

type CacheKey = (Address, Address);
type InFlight = Shared<BoxFuture<'static, Result<DecryptionAuthorization, AuthError>>>;

/// The interactive signing capability. Implementations prompt the viewer and
/// may be declined.
pub trait AuthorizationSigner: Send + Sync {
    fn sign_authorization(
        &self,
        viewer: Address,
        contract: Address,
        expires_at: u64,
    ) -> BoxFuture<'static, Result<DecryptionAuthorization, AuthError>>;
}

/// Signer backed by a local keypair; approves every prompt.
pub struct KeypairSigner {
    keys: Arc<Keypair>,
}

impl KeypairSigner {
    pub fn new(keys: Arc<Keypair>) -> Self {
        Self { keys }
    }
}

impl AuthorizationSigner for KeypairSigner {
    fn sign_authorization(
        &self,
        viewer: Address,
        contract: Address,
        expires_at: u64,
    ) -> BoxFuture<'static, Result<DecryptionAuthorization, AuthError>> {
        let keys = Arc::clone(&self.keys);
        async move {
            if keys.address() != viewer {
                return Err(AuthError::Signer(format!(
                    "signer holds keys for {}, not {viewer}",
                    keys.address()
                )));
            }
            Ok(DecryptionAuthorization::issue(&keys, contract, expires_at))
        }
        .boxed()
    }
}

/// Process-wide authorization cache, keyed by (viewer, contract).
///
/// Expiry never reaches callers: an expired entry is regenerated
/// transparently on the next request.
pub struct DecryptionAuthorizer {
    signer: Arc<dyn AuthorizationSigner>,
    ttl: Duration,
    cache: DashMap<CacheKey, DecryptionAuthorization>,
    inflight: Mutex<HashMap<CacheKey, InFlight>>,
}

impl DecryptionAuthorizer {
    pub fn new(signer: Arc<dyn AuthorizationSigner>, ttl: Duration) -> Self {
        Self {
            signer,
            ttl,
            cache: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a valid authorization for (viewer, contract), prompting the
    /// viewer only on a cache miss or expiry.
    pub async fn get_or_create(
        &self,
        viewer: Address,
        contract: Address,
    ) -> Result<DecryptionAuthorization, AuthError> {
        let key = (viewer, contract);

        if let Some(cached) = self.cache.get(&key) {
            if !cached.is_expired(unix_now()) {
                debug!("authorization cache hit for {viewer}");
                return Ok(cached.clone());
            }
            debug!("authorization for {viewer} expired, regenerating");
        }

        let request = {
            let mut inflight = self.inflight.lock().expect("authorizer lock poisoned");
            match inflight.get(&key) {
                Some(pending) => pending.clone(),
                None => {
                    let expires_at = unix_now() + self.ttl.as_secs();
                    let pending = self
                        .signer
                        .sign_authorization(viewer, contract, expires_at)
                        .shared();
                    inflight.insert(key, pending.clone());
                    pending
                }
            }
        };

        let result = request.clone().await;
        self.finish(&key, &request);

        match result {
            Ok(authorization) => {
                info!("decryption authorization issued for {viewer}");
                self.cache.insert(key, authorization.clone());
                Ok(authorization)
            }
            Err(e) => Err(e),
        }
    }

    /// Drops the cached authorization for (viewer, contract), e.g. on
    /// account or contract change.
    pub fn invalidate(&self, viewer: Address, contract: Address) {
        self.cache.remove(&(viewer, contract));
    }

    /// Clears the in-flight slot, but only if it still holds the request we
    /// just awaited. A newer request installed by another caller in the
    /// meantime must keep coalescing and is left untouched.
    fn finish(&self, key: &CacheKey, request: &InFlight) {
        let mut inflight = self.inflight.lock().expect("authorizer lock poisoned");
        if inflight
            .get(key)
            .is_some_and(|current| current.ptr_eq(request))
        {
            inflight.remove(key);
        }
    }
}
