// ABOUTME: Authentication through keys held by the running SSH agent.
// ABOUTME: Also serves PKCS#11 keys, which are loaded into the agent beforehand.

use super::client::SshHandler;
use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key;
use russh::{AgentAuthError, CryptoVec, Signer};
use std::future::Future;

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Signs through the agent with an owned copy of the key, so the signing
/// future does not borrow across an await and stays `Send`.
struct AgentSigner<'a> {
    agent: &'a mut DynAgent,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key = key.clone();
        async move {
            self.agent
                .sign_request(&key, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

/// Try every identity the agent offers. `Ok(false)` when none is accepted.
pub(super) async fn authenticate(handle: &mut Handle<SshHandler>, user: &str) -> Result<bool, String> {
    let mut agent = AgentClient::connect_env()
        .await
        .map_err(|e| format!("SSH agent unavailable: {e}"))?
        .dynamic();

    let keys = agent
        .request_identities()
        .await
        .map_err(|e| format!("failed to list agent keys: {e}"))?;
    tracing::debug!(count = keys.len(), "agent identities");

    for key in &keys {
        let result = handle
            .authenticate_publickey_with(user, key.clone(), None, &mut AgentSigner { agent: &mut agent })
            .await;
        match result {
            Ok(result) if result.success() => return Ok(true),
            Ok(_) => tracing::debug!(comment = key.comment(), "agent key rejected"),
            Err(e) => tracing::debug!(comment = key.comment(), error = %e, "agent signing failed"),
        }
    }
    Ok(false)
}
