//! Declarative macros for ergonomic effect construction

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust
/// use ripple_core::{async_effect, Effect};
///
/// #[derive(Debug)]
/// enum SearchAction {
///     Response(Vec<String>),
/// }
///
/// let effect: Effect<SearchAction> = async_effect! {
///     Some(SearchAction::Response(vec!["rust".to_string()]))
/// };
/// assert!(matches!(effect, Effect::Future(_)));
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::future(async move { $($body)* })
    };
}

/// Create an `Effect::Delay` dispatching an action after a delay
///
/// # Example
///
/// ```rust,ignore
/// use ripple_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(30),
///     scheduler: env.scheduler.clone(),
///     action: OrderAction::TimeoutExpired
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        scheduler: $scheduler:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            scheduler: $scheduler,
            effect: ::std::boxed::Box::new($crate::effect::Effect::Just($action)),
        }
    };
}
