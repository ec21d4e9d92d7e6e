//! Rule engine: evaluates gates, configs and layers against a user.
mod conditions;
mod eval_spec;
mod evaluator;
mod overrides;
mod resolvers;
mod result;

pub use eval_spec::{eval_spec, EvalInput};
pub use evaluator::{Evaluator, EvaluatorConfig};
pub use overrides::LocalOverrides;
pub use resolvers::{FieldResolvers, IpCountryLookup, ParsedUserAgent, UserAgentParser};
pub use result::{
    EvaluationDetails, EvaluationOutcome, EvaluationReason, EvaluationResult, SecondaryExposure,
};
