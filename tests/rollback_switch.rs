//! Services A -> B -> C; B fails; with `rollbackOnError = true`, A is
//! rolled back and C is never switched.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gitfleet::dependency::Edge;
use gitfleet::error::GzhError;
use gitfleet::switch::{EnvironmentSwitcher, ServiceConfig, ServiceSpec, ServiceSwitcher};

struct RecordingSwitcher {
    name: String,
    fail: bool,
    switched: Arc<Mutex<Vec<String>>>,
    rolled_back: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ServiceSwitcher for RecordingSwitcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn switch(&self, _config: &ServiceConfig) -> Result<(), GzhError> {
        if self.fail {
            return Err(GzhError::Network("simulated backend failure".to_string()));
        }
        self.switched.lock().unwrap().push(self.name.clone());
        Ok(())
    }

    async fn get_current_state(&self) -> Result<ServiceConfig, GzhError> {
        Ok(ServiceConfig::ContainerContext {
            context: format!("{}-before", self.name),
        })
    }

    async fn rollback(&self, _previous: &ServiceConfig) -> Result<(), GzhError> {
        self.rolled_back.lock().unwrap().push(self.name.clone());
        Ok(())
    }
}

fn spec(name: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        config: ServiceConfig::ContainerContext { context: "after".to_string() },
    }
}

#[tokio::test]
async fn rollback_on_error_reverts_upstream_service_and_skips_downstream() {
    let switched = Arc::new(Mutex::new(Vec::new()));
    let rolled_back = Arc::new(Mutex::new(Vec::new()));

    let mut env = EnvironmentSwitcher::new(true, false, false);
    for (name, fail) in [("a", false), ("b", true), ("c", false)] {
        env.register(Arc::new(RecordingSwitcher {
            name: name.to_string(),
            fail,
            switched: switched.clone(),
            rolled_back: rolled_back.clone(),
        }));
    }

    let specs = vec![spec("a"), spec("b"), spec("c")];
    let edges = vec![
        Edge { from: "a".to_string(), to: "b".to_string() },
        Edge { from: "b".to_string(), to: "c".to_string() },
    ];

    let outcomes = env.switch_all(&specs, edges, &[], &[]).await.unwrap();

    assert!(switched.lock().unwrap().contains(&"a".to_string()));
    assert!(!switched.lock().unwrap().contains(&"c".to_string()));
    assert_eq!(rolled_back.lock().unwrap().as_slice(), ["a".to_string()]);

    let a = outcomes.iter().find(|o| o.service == "a").unwrap();
    assert!(a.success);
    assert!(a.rolled_back);

    let b = outcomes.iter().find(|o| o.service == "b").unwrap();
    assert!(!b.success);

    assert!(outcomes.iter().all(|o| o.service != "c"));
}
