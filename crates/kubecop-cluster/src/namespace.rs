//! Test namespaces: generated names, adopt-or-create, owned teardown

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::{error, info};

use kubecop_common::kube_utils::poll_until;
use kubecop_common::Error;

use crate::ops::ClusterOps;

/// How long teardown waits for a deleted namespace to disappear
pub const NAMESPACE_DELETE_TIMEOUT: Duration = Duration::from_secs(120);

const NAMESPACE_DELETE_POLL: Duration = Duration::from_secs(2);

const SUFFIX_LEN: usize = 4;

/// Names handed out by this process; never reused within a run
static GENERATED: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

/// Generate `<prefix>-test-<4 lowercase letters>`, unique within the process
pub fn generate_namespace_name(prefix: &str) -> String {
    loop {
        let candidate = format!("{prefix}-test-{}", random_suffix());
        let mut seen = GENERATED.lock().unwrap_or_else(|e| e.into_inner());
        if seen.insert(candidate.clone()) {
            return candidate;
        }
    }
}

/// A namespace used by a scenario.
///
/// A namespace that already existed is adopted and survives teardown; one
/// created here is deleted on teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    /// Namespace name
    pub name: String,
    /// Whether teardown should delete it
    pub created_by_test: bool,
}

impl NamespaceHandle {
    /// Adopt `name` if it exists, otherwise create it; `None` generates a name
    pub async fn create(
        ops: &dyn ClusterOps,
        name: Option<&str>,
        prefix: &str,
    ) -> Result<Self, Error> {
        let name = match name {
            Some(n) => n.to_string(),
            None => generate_namespace_name(prefix),
        };

        if ops.namespace_exists(&name).await? {
            info!(namespace = %name, "Adopting existing namespace");
            return Ok(Self {
                name,
                created_by_test: false,
            });
        }

        ops.create_namespace(&name).await?;
        Ok(Self {
            name,
            created_by_test: true,
        })
    }

    /// Delete the namespace if this handle created it and wait until it is gone.
    ///
    /// Failures are logged, never returned.
    pub async fn teardown(&self, ops: &dyn ClusterOps) {
        self.teardown_with_timeout(ops, NAMESPACE_DELETE_TIMEOUT, NAMESPACE_DELETE_POLL)
            .await
    }

    pub(crate) async fn teardown_with_timeout(
        &self,
        ops: &dyn ClusterOps,
        timeout: Duration,
        poll_interval: Duration,
    ) {
        if !self.created_by_test {
            return;
        }

        if let Err(e) = ops.delete_namespace(&self.name).await {
            error!(namespace = %self.name, error = %e, "Failed to delete namespace");
            return;
        }

        let name = self.name.as_str();
        let gone = poll_until(
            timeout,
            poll_interval,
            || Error::resource("Namespace", name, format!("still present after {timeout:?}")),
            move || async move { ops.namespace_exists(name).await.map(|exists| !exists) },
        )
        .await;
        if let Err(e) = gone {
            error!(namespace = %self.name, error = %e, "Namespace deletion did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::MockClusterOps;
    use mockall::predicate::eq;

    #[test]
    fn generated_names_have_expected_shape() {
        let name = generate_namespace_name("kubecop");
        let suffix = name.strip_prefix("kubecop-test-").unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn suffix_is_always_four_lowercase_letters() {
        for _ in 0..500 {
            let suffix = random_suffix();
            assert_eq!(suffix.len(), SUFFIX_LEN);
            assert!(suffix.bytes().all(|b| b.is_ascii_lowercase()), "{suffix}");
        }
    }

    #[test]
    fn generated_names_are_unique() {
        let names: HashSet<String> = (0..200).map(|_| generate_namespace_name("uniq")).collect();
        assert_eq!(names.len(), 200);
    }

    #[tokio::test]
    async fn existing_namespace_is_adopted() {
        let mut ops = MockClusterOps::new();
        ops.expect_namespace_exists()
            .with(eq("shared"))
            .returning(|_| Ok(true));
        ops.expect_create_namespace().never();

        let ns = NamespaceHandle::create(&ops, Some("shared"), "kubecop")
            .await
            .unwrap();
        assert_eq!(ns.name, "shared");
        assert!(!ns.created_by_test);
    }

    #[tokio::test]
    async fn adopted_namespace_survives_teardown() {
        let mut ops = MockClusterOps::new();
        ops.expect_delete_namespace().never();

        let ns = NamespaceHandle {
            name: "shared".to_string(),
            created_by_test: false,
        };
        ns.teardown(&ops).await;
    }

    #[tokio::test]
    async fn missing_namespace_is_created_and_owned() {
        let mut ops = MockClusterOps::new();
        ops.expect_namespace_exists().returning(|_| Ok(false));
        ops.expect_create_namespace()
            .times(1)
            .returning(|_| Ok(()));

        let ns = NamespaceHandle::create(&ops, None, "kubecop").await.unwrap();
        assert!(ns.name.starts_with("kubecop-test-"));
        assert!(ns.created_by_test);
    }

    #[tokio::test]
    async fn owned_namespace_teardown_waits_for_deletion() {
        let mut ops = MockClusterOps::new();
        ops.expect_delete_namespace()
            .with(eq("kubecop-test-abcd"))
            .times(1)
            .returning(|_| Ok(()));
        let mut seq = mockall::Sequence::new();
        ops.expect_namespace_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));
        ops.expect_namespace_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(false));

        let ns = NamespaceHandle {
            name: "kubecop-test-abcd".to_string(),
            created_by_test: true,
        };
        ns.teardown_with_timeout(&ops, Duration::from_secs(5), Duration::from_millis(1))
            .await;
    }

    #[tokio::test]
    async fn teardown_delete_failure_is_swallowed() {
        let mut ops = MockClusterOps::new();
        ops.expect_delete_namespace()
            .returning(|n| Err(Error::resource("Namespace", n, "forbidden")));
        ops.expect_namespace_exists().never();

        let ns = NamespaceHandle {
            name: "kubecop-test-zzzz".to_string(),
            created_by_test: true,
        };
        ns.teardown(&ops).await;
    }
}
