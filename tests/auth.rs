// ABOUTME: Integration tests for credential materialization and sharing across hosts.
// ABOUTME: Covers single-flight deduplication, failure isolation, ordering and real key decoding.

mod support;

use async_trait::async_trait;
use futures::future::join_all;
use herd::auth::*;
use herd::config::{Config, Secret};
use parking_lot::Mutex;
use russh::keys::ssh_key;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Counts calls per credential; descriptors whose identity contains "broken" fail.
#[derive(Default)]
struct CountingMaterializer {
    calls: Mutex<Vec<CredentialKey>>,
}

impl CountingMaterializer {
    fn calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Materializer for CountingMaterializer {
    async fn materialize(
        &self,
        descriptor: &CredentialDescriptor,
    ) -> herd::auth::Result<CredentialMaterial> {
        let key = descriptor.key();
        self.calls.lock().push(key.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        if key.identity.contains("broken") {
            return Err(CredentialError::KeyRead {
                identity: key.identity,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(match descriptor {
            CredentialDescriptor::Agent => CredentialMaterial::Agent,
            _ => CredentialMaterial::Password("material".to_string()),
        })
    }

    async fn certificate(
        &self,
        cert: &Path,
        signer: Arc<ssh_key::PrivateKey>,
    ) -> herd::auth::Result<CredentialMaterial> {
        KeyMaterializer::new(Arc::new(NoPrompt))
            .certificate(cert, signer)
            .await
    }
}

fn kinds(set: &HostAuthSet) -> Vec<CredentialKind> {
    set.methods().iter().map(|(key, _)| key.kind).collect()
}

mod registry {
    use super::*;

    #[tokio::test]
    async fn concurrent_requests_materialize_once() {
        support::init_tracing();
        let materializer = Arc::new(CountingMaterializer::default());
        let registry = CredentialRegistry::new(materializer.clone());
        let descriptor = CredentialDescriptor::Key {
            path: PathBuf::from("/keys/shared"),
            passphrase: Some(Secret::from("pw")),
        };

        let results = join_all((0..8).map(|_| registry.resolve(&descriptor))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(materializer.calls(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn different_passphrases_are_different_credentials() {
        let materializer = Arc::new(CountingMaterializer::default());
        let registry = CredentialRegistry::new(materializer.clone());
        let with = |pass: &str| CredentialDescriptor::Key {
            path: PathBuf::from("/keys/shared"),
            passphrase: Some(Secret::from(pass)),
        };

        registry.resolve(&with("one")).await.unwrap();
        registry.resolve(&with("two")).await.unwrap();
        registry.resolve(&with("one")).await.unwrap();

        assert_eq!(materializer.calls(), 2);
    }

    #[tokio::test]
    async fn failures_are_cached_too() {
        let materializer = Arc::new(CountingMaterializer::default());
        let registry = CredentialRegistry::new(materializer.clone());
        let descriptor = CredentialDescriptor::Key {
            path: PathBuf::from("/keys/broken"),
            passphrase: None,
        };

        let first = registry.resolve(&descriptor).await;
        let second = registry.resolve(&descriptor).await;

        assert!(first.is_err() && second.is_err());
        assert_eq!(materializer.calls(), 1);
    }
}

mod auth_sets {
    use super::*;

    const CATALOG: &str = r#"
hosts:
  bastion:
    addr: 203.0.113.1
    key: /keys/team
  web1:
    addr: 10.0.0.1
    proxy: bastion
    agent: true
    password: pw
    key: /keys/team
  web2:
    addr: 10.0.0.2
    key: /keys/team
    keys: ["/keys/broken"]
"#;

    #[tokio::test]
    async fn shared_key_is_materialized_once_for_every_host() {
        let config = Config::from_yaml(CATALOG).unwrap();
        let materializer = Arc::new(CountingMaterializer::default());
        let registry = CredentialRegistry::new(materializer.clone());
        let hosts = config
            .select(&["web1".to_string(), "web2".to_string()])
            .unwrap();

        let sets = registry.build(&hosts, &config).await.unwrap();

        // team key, password, agent, broken key
        assert_eq!(materializer.calls(), 4);
        let team = materializer
            .calls
            .lock()
            .iter()
            .filter(|k| k.identity.starts_with("/keys/team"))
            .count();
        assert_eq!(team, 1);
        assert_eq!(sets.len(), 3, "jump host gets an auth set too");
        assert!(sets.contains_key("bastion"));
    }

    #[tokio::test]
    async fn methods_are_ordered_by_priority() {
        let config = Config::from_yaml(CATALOG).unwrap();
        let registry = CredentialRegistry::new(Arc::new(CountingMaterializer::default()));

        let set = registry.auth_set(config.host("web1").unwrap()).await;

        assert_eq!(
            kinds(&set),
            [CredentialKind::Key, CredentialKind::Password, CredentialKind::Agent]
        );
    }

    #[tokio::test]
    async fn failed_credential_leaves_the_others() {
        let config = Config::from_yaml(CATALOG).unwrap();
        let registry = CredentialRegistry::new(Arc::new(CountingMaterializer::default()));

        let set = registry.auth_set(config.host("web2").unwrap()).await;

        assert_eq!(kinds(&set), [CredentialKind::Key]);
        assert_eq!(set.failures().len(), 1);
        assert!(set.failures()[0].0.identity.starts_with("/keys/broken"));
    }

    #[test]
    fn password_keys_do_not_leak_in_logs() {
        let key = CredentialDescriptor::Password(Secret::from("hunter2")).key();
        assert!(!format!("{key:?}").contains("hunter2"));

        let key = CredentialDescriptor::Key {
            path: PathBuf::from("/keys/id"),
            passphrase: Some(Secret::from("hunter2")),
        }
        .key();
        let shown = format!("{key}");
        assert!(shown.contains("/keys/id"));
        assert!(!shown.contains("hunter2"));
    }
}

mod key_files {
    use super::*;

    /// Answers every prompt with the same passphrase and counts prompts.
    struct ScriptedPrompter {
        answer: &'static str,
        prompts: AtomicUsize,
    }

    impl ScriptedPrompter {
        fn new(answer: &'static str) -> Arc<Self> {
            Arc::new(Self {
                answer,
                prompts: AtomicUsize::new(0),
            })
        }
    }

    impl Prompter for ScriptedPrompter {
        fn prompt_secret(&self, _message: &str) -> std::result::Result<String, CredentialError> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.to_string())
        }
    }

    fn key(name: &str, passphrase: Option<&str>) -> CredentialDescriptor {
        CredentialDescriptor::Key {
            path: fixture(name),
            passphrase: passphrase.map(Secret::from),
        }
    }

    #[tokio::test]
    async fn unencrypted_key_loads() {
        let materializer = KeyMaterializer::new(Arc::new(NoPrompt));

        let material = materializer.materialize(&key("id_ed25519", None)).await.unwrap();

        assert_eq!(material.kind(), CredentialKind::Key);
    }

    #[tokio::test]
    async fn configured_passphrase_decrypts_key() {
        let prompter = ScriptedPrompter::new("unused");
        let materializer = KeyMaterializer::new(prompter.clone());

        let material = materializer
            .materialize(&key("id_ed25519_encrypted", Some("hunter2")))
            .await
            .unwrap();

        assert_eq!(material.kind(), CredentialKind::Key);
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_passphrase_is_prompted_for() {
        let prompter = ScriptedPrompter::new("hunter2");
        let materializer = KeyMaterializer::new(prompter.clone());

        materializer
            .materialize(&key("id_ed25519_encrypted", None))
            .await
            .unwrap();

        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_passphrases_give_up_after_limit() {
        let prompter = ScriptedPrompter::new("nope");
        let materializer = KeyMaterializer::new(prompter.clone());

        let err = materializer
            .materialize(&key("id_ed25519_encrypted", Some("also-wrong")))
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::WrongPassphrase { attempts, .. } if attempts == MAX_PROMPT_ATTEMPTS));
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), MAX_PROMPT_ATTEMPTS);
    }

    #[tokio::test]
    async fn no_terminal_means_no_prompt() {
        let materializer = KeyMaterializer::new(Arc::new(NoPrompt));

        let err = materializer
            .materialize(&key("id_ed25519_encrypted", None))
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Prompt(_)));
    }

    #[tokio::test]
    async fn missing_key_file_is_a_read_error() {
        let materializer = KeyMaterializer::new(Arc::new(NoPrompt));

        let err = materializer
            .materialize(&key("does_not_exist", None))
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::KeyRead { .. }));
    }

    #[tokio::test]
    async fn key_command_output_is_decoded() {
        let materializer = KeyMaterializer::new(Arc::new(NoPrompt));
        let command = format!("cat {}", fixture("id_ed25519").display());

        let material = materializer
            .materialize(&CredentialDescriptor::KeyCommand {
                command,
                passphrase: None,
            })
            .await
            .unwrap();

        assert_eq!(material.kind(), CredentialKind::Key);
    }

    #[tokio::test]
    async fn failing_key_command_is_reported() {
        let materializer = KeyMaterializer::new(Arc::new(NoPrompt));

        let err = materializer
            .materialize(&CredentialDescriptor::KeyCommand {
                command: "exit 1".to_string(),
                passphrase: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::KeyCommand { .. }));
    }

    #[tokio::test]
    async fn certificate_pairs_with_its_signing_key() {
        let registry = CredentialRegistry::new(Arc::new(KeyMaterializer::new(Arc::new(NoPrompt))));
        let descriptor = CredentialDescriptor::Certificate {
            cert: fixture("id_ed25519_encrypted-cert.pub"),
            key: fixture("id_ed25519_encrypted"),
            passphrase: Some(Secret::from("hunter2")),
        };

        let material = registry.resolve(&descriptor).await.unwrap();

        assert_eq!(material.kind(), CredentialKind::Certificate);
        // The signing key is cached under its own key descriptor.
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn certificate_with_unusable_key_fails() {
        let registry = CredentialRegistry::new(Arc::new(KeyMaterializer::new(Arc::new(NoPrompt))));
        let descriptor = CredentialDescriptor::Certificate {
            cert: fixture("id_ed25519_encrypted-cert.pub"),
            key: fixture("does_not_exist"),
            passphrase: None,
        };

        let err = registry.resolve(&descriptor).await.unwrap_err();

        assert!(matches!(err.as_ref(), CredentialError::Certificate { .. }));
    }
}
