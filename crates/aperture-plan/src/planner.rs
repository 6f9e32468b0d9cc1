use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aperture_types::prelude::Principal;

use crate::errors::PlanError;
use crate::model::{Plan, Step};

/// Turns an intent into an executable plan. Implementations may be
/// model-backed or rule-based; every returned plan has gap-free step orders.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, intent: &str, principal: &Principal) -> Result<Plan, PlanError>;
}

/// One keyword-routed step of the rule planner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PlannerRoute {
    /// Case-insensitive substring of the intent that activates this route.
    pub contains: String,
    pub service_name: String,
    pub function_name: String,
    #[serde(default)]
    pub description: String,
    /// Parameter template; `${…}` references are resolved at execution time.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub fallback_value: Option<Value>,
}

/// Deterministic keyword planner. Routes whose keyword occurs in the intent
/// become steps in declaration order; with no match, a single default step
/// carries the whole intent downstream.
pub struct RulePlanner {
    routes: Vec<PlannerRoute>,
    default_service: String,
    default_function: String,
}

impl RulePlanner {
    pub fn new(
        routes: Vec<PlannerRoute>,
        default_service: impl Into<String>,
        default_function: impl Into<String>,
    ) -> Self {
        Self {
            routes,
            default_service: default_service.into(),
            default_function: default_function.into(),
        }
    }

    fn default_parameters() -> Map<String, Value> {
        let mut parameters = Map::new();
        parameters.insert("intent".into(), Value::String("${intent}".into()));
        parameters.insert("userId".into(), Value::String("${userId}".into()));
        parameters
    }
}

#[async_trait]
impl Planner for RulePlanner {
    async fn plan(&self, intent: &str, _principal: &Principal) -> Result<Plan, PlanError> {
        let lowered = intent.to_lowercase();
        let mut steps: Vec<Step> = self
            .routes
            .iter()
            .filter(|route| lowered.contains(&route.contains.to_lowercase()))
            .enumerate()
            .map(|(index, route)| Step {
                order: index as u32 + 1,
                service_name: route.service_name.clone(),
                function_name: route.function_name.clone(),
                description: route.description.clone(),
                parameters: if route.parameters.is_empty() {
                    Self::default_parameters()
                } else {
                    route.parameters.clone()
                },
                fallback_value: route.fallback_value.clone(),
            })
            .collect();

        if steps.is_empty() {
            steps.push(Step {
                order: 1,
                service_name: self.default_service.clone(),
                function_name: self.default_function.clone(),
                description: "default handling of the intent".into(),
                parameters: Self::default_parameters(),
                fallback_value: None,
            });
        }

        let plan = Plan {
            id: uuid::Uuid::new_v4().to_string(),
            intent: intent.to_string(),
            steps,
        };
        plan.validate()?;
        Ok(plan)
    }
}
