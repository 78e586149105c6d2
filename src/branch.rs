//! Predicate routing over validated input.
//!
//! [`Branch`] validates its input into a schema type, evaluates predicates
//! in declaration order and runs the first arm whose predicate holds. If
//! none holds, the mandatory fallback runs. Every arm produces a
//! [`StageOutput`], so callers never care which one was taken.

use crate::{
    error::Result,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    stage::{observe, BoxFut, Stage, StageOutput},
    validator::{Schema, Validator},
    PipelineError,
};
use serde_json::Value;
use tracing::{event, Level};

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Which stage a [`Branch`] selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Index of the first arm whose predicate held.
    Arm(usize),
    /// No predicate held.
    Fallback,
}

struct Arm<T> {
    predicate: Predicate<T>,
    stage: Box<dyn Stage>,
}

/// Conditional routing on a structured value of type `T`.
///
/// # Example
///
/// ```
/// use llm_chains::{Branch, FieldSpec, Lambda, Schema};
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Serialize, Deserialize)]
/// struct Ticket {
///     priority: String,
/// }
///
/// impl Schema for Ticket {
///     fn fields() -> Vec<FieldSpec> {
///         vec![FieldSpec::enumeration("priority", "Ticket priority", &["high", "low"])]
///     }
/// }
///
/// let triage = Branch::<Ticket>::builder("triage")
///     .when(|t| t.priority == "high", Lambda::constant("page", json!("paging on-call")))
///     .otherwise(Lambda::constant("queue", json!("queued")))
///     .build()
///     .unwrap();
/// ```
pub struct Branch<T: Schema> {
    name: String,
    validator: Validator<T>,
    arms: Vec<Arm<T>>,
    fallback: Box<dyn Stage>,
}

impl<T: Schema> Branch<T> {
    pub fn builder(name: impl Into<String>) -> BranchBuilder<T> {
        BranchBuilder {
            name: name.into(),
            arms: Vec::new(),
            fallback: None,
        }
    }

    /// First arm whose predicate holds. Later predicates are not evaluated.
    pub fn route(&self, value: &T) -> Route {
        self.arms
            .iter()
            .position(|arm| (arm.predicate)(value))
            .map_or(Route::Fallback, Route::Arm)
    }

    /// The stage a route points at.
    pub fn stage_for(&self, route: Route) -> &dyn Stage {
        match route {
            Route::Arm(i) => self.arms.get(i).map_or(&*self.fallback, |arm| &*arm.stage),
            Route::Fallback => &*self.fallback,
        }
    }

    /// Validate `input`, route it and run the selected stage.
    ///
    /// Invalid input fails with a schema violation before any predicate
    /// runs. The selected stage receives the validated value as JSON.
    pub async fn execute(&self, ctx: &ExecCtx, input: Value) -> Result<StageOutput> {
        ctx.check_cancelled()?;
        let structured = self.validator.check(&input).map_err(|e| {
            event!(Level::DEBUG, error = %e, "Branch input rejected.");
            e
        })?;

        let route = self.route(&structured);
        let selected = self.stage_for(route);
        let fallback = route == Route::Fallback;
        event!(Level::DEBUG, selected = %selected.name(), fallback, "Routed.");
        emit(
            &ctx.event_handler,
            Event::BranchRouted {
                name: self.name.clone(),
                selected: selected.name().to_string(),
                fallback,
            },
        );

        let forwarded = serde_json::to_value(&*structured)?;
        selected
            .invoke(ctx, forwarded)
            .await
            .map_err(|e| e.in_stage(selected.name()))
    }
}

impl<T: Schema> std::fmt::Debug for Branch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arms: Vec<&str> = self.arms.iter().map(|a| a.stage.name()).collect();
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("arms", &arms)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl<T: Schema> Stage for Branch<T> {
    fn kind(&self) -> &'static str {
        "branch"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<StageOutput>> {
        Box::pin(observe(self, ctx, self.execute(ctx, input)))
    }
}

/// Builder for [`Branch`].
pub struct BranchBuilder<T: Schema> {
    name: String,
    arms: Vec<Arm<T>>,
    fallback: Option<Box<dyn Stage>>,
}

impl<T: Schema> BranchBuilder<T> {
    /// Add an arm. Arms are tried in the order they are added.
    pub fn when(
        mut self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        stage: impl Stage + 'static,
    ) -> Self {
        self.arms.push(Arm {
            predicate: Box::new(predicate),
            stage: Box::new(stage),
        });
        self
    }

    /// Set the stage run when no predicate holds.
    pub fn otherwise(mut self, stage: impl Stage + 'static) -> Self {
        self.fallback = Some(Box::new(stage));
        self
    }

    /// Fails when no fallback was set.
    pub fn build(self) -> Result<Branch<T>> {
        let fallback = self.fallback.ok_or_else(|| {
            PipelineError::Construction(format!("branch '{}' needs a fallback stage", self.name))
        })?;
        Ok(Branch {
            validator: Validator::new(format!("{}-input", self.name)),
            name: self.name,
            arms: self.arms,
            fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::testing::Recorder;
    use crate::stage::Lambda;
    use crate::validator::FieldSpec;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "lowercase")]
    enum Sentiment {
        Positive,
        Negative,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Feedback {
        sentiment: Sentiment,
    }

    impl Schema for Feedback {
        fn fields() -> Vec<FieldSpec> {
            vec![FieldSpec::enumeration(
                "sentiment",
                "Give the sentiment of the feedback",
                &["positive", "negative"],
            )]
        }
    }

    fn test_ctx() -> ExecCtx {
        ExecCtx::builder("http://test").build()
    }

    fn responder() -> Branch<Feedback> {
        Branch::builder("respond")
            .when(
                |f: &Feedback| f.sentiment == Sentiment::Positive,
                Lambda::constant("thank", json!("Thanks!")),
            )
            .when(
                |f: &Feedback| f.sentiment == Sentiment::Negative,
                Lambda::constant("apologise", json!("Sorry to hear that.")),
            )
            .otherwise(Lambda::constant("fallback", json!("could not find sentiment")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_fallback_rejected() {
        let err = Branch::<Feedback>::builder("no-fallback")
            .when(|_| true, Lambda::identity("a"))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Construction);
    }

    #[test]
    fn test_first_match_wins() {
        let later = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&later);
        let branch = Branch::<Feedback>::builder("b")
            .when(|_| true, Lambda::identity("first"))
            .when(
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    true
                },
                Lambda::identity("second"),
            )
            .otherwise(Lambda::identity("fallback"))
            .build()
            .unwrap();

        let value = Feedback {
            sentiment: Sentiment::Negative,
        };
        assert_eq!(branch.route(&value), Route::Arm(0));
        assert_eq!(branch.stage_for(Route::Arm(0)).name(), "first");
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_routes_by_sentiment() {
        let branch = responder();
        let ctx = test_ctx();
        let out = branch
            .execute(&ctx, json!({"sentiment": "positive"}))
            .await
            .unwrap();
        assert_eq!(out.text(), "Thanks!");

        let out = branch
            .execute(&ctx, json!(r#"{"sentiment": "negative"}"#))
            .await
            .unwrap();
        assert_eq!(out.text(), "Sorry to hear that.");
    }

    #[tokio::test]
    async fn test_routing_is_repeatable() {
        let branch = responder();
        let ctx = test_ctx();
        for _ in 0..25 {
            for (sentiment, expected) in [("positive", "Thanks!"), ("negative", "Sorry to hear that.")] {
                let out = branch
                    .execute(&ctx, json!({ "sentiment": sentiment }))
                    .await
                    .unwrap();
                assert_eq!(out.text(), expected);
            }
        }
    }

    #[tokio::test]
    async fn test_fallback_only_branch() {
        let branch = Branch::<Feedback>::builder("only")
            .otherwise(Lambda::identity("echo"))
            .build()
            .unwrap();
        let out = branch
            .invoke(&test_ctx(), json!({"sentiment": "positive", "extra": 1}))
            .await
            .unwrap();
        // The fallback sees the validated value, extra fields dropped.
        assert_eq!(out.value, json!({"sentiment": "positive"}));
    }

    #[tokio::test]
    async fn test_invalid_input_runs_no_arm() {
        let evaluated = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&evaluated);
        let branch = Branch::<Feedback>::builder("strict")
            .when(
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    true
                },
                Lambda::identity("arm"),
            )
            .otherwise(Lambda::identity("fallback"))
            .build()
            .unwrap();

        let err = branch
            .execute(&test_ctx(), json!({"sentiment": "neutral"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_arm_failure_names_selected_stage() {
        let branch = Branch::<Feedback>::builder("b")
            .when(
                |_| true,
                Lambda::new("reply", |_| Err(anyhow::anyhow!("model down"))),
            )
            .otherwise(Lambda::identity("fallback"))
            .build()
            .unwrap();
        let err = branch
            .execute(&test_ctx(), json!({"sentiment": "positive"}))
            .await
            .unwrap_err();
        assert_eq!(err.stage_path(), ["reply"]);
        assert_eq!(err.kind(), ErrorKind::Call);
    }

    #[tokio::test]
    async fn test_routed_event() {
        let recorder = Arc::new(Recorder::default());
        let ctx = ExecCtx::builder("http://test")
            .event_handler(recorder.clone())
            .build();
        let branch = Branch::<Feedback>::builder("b")
            .when(
                |f: &Feedback| f.sentiment == Sentiment::Positive,
                Lambda::identity("pos"),
            )
            .otherwise(Lambda::identity("fallback"))
            .build()
            .unwrap();
        branch
            .invoke(&ctx, json!({"sentiment": "negative"}))
            .await
            .unwrap();

        let routed: Vec<_> = recorder
            .take()
            .into_iter()
            .filter_map(|e| match e {
                Event::BranchRouted {
                    selected, fallback, ..
                } => Some((selected, fallback)),
                _ => None,
            })
            .collect();
        assert_eq!(routed, [("fallback".to_string(), true)]);
    }
}
