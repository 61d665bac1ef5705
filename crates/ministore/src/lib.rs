#![forbid(unsafe_code)]

//! Single-threaded reactive state store.
//!
//! A store is built from a [`FieldMap`]: data fields become the initial
//! [`State`] snapshot, action fields become [`Actions`] bound to the live
//! store. Layers are stacked with [`Pipeline`]:
//!
//! - [`Store`]: one immutable snapshot, ordered listeners, explicit destroy.
//! - [`DraftLayer`]: nested updates through a [`Draft`] with structural
//!   sharing of untouched subtrees.
//! - [`ActionsLayer`]: referentially stable bound actions.
//!
//! [`create`] stacks all three.
//!
//! # Example
//!
//! ```
//! use ministore::{FieldMap, HasActions, StoreApi, Update, Value, create};
//!
//! let store = create(
//!     FieldMap::new()
//!         .data("count", 0)
//!         .action("increment", |ctx, _| {
//!             ctx.mutate(|d| {
//!                 d.update("count", |v| {
//!                     *v = Value::Int(v.as_i64().unwrap_or(0) + 1);
//!                     Ok(())
//!                 })
//!             })
//!         }),
//! )?;
//!
//! store.get_actions().dispatch("increment", &[])?;
//! assert_eq!(store.get_state().get("count"), Some(&Value::Int(1)));
//! # Ok::<(), ministore::StoreError>(())
//! ```

pub mod actions;
pub mod config;
pub mod draft;
pub mod error;
pub mod middleware;
pub mod partition;
pub mod state;
pub mod store;
pub mod value;

pub use actions::{
    ActionContext, ActionFn, Actions, ActionsLayer, BoundAction, HasActions, WithActions, action,
};
pub use config::StoreConfig;
pub use draft::{Draft, produce};
pub use error::{ConflictReason, MutationError, Result, StoreError};
pub use middleware::{CapabilityTag, DraftLayer, HasDraft, Middleware, Pipeline, WithDraft};
pub use partition::{ActionTable, Field, FieldKind, FieldMap, Partition, partition, partition_declared};
pub use state::State;
pub use store::{Listener, Store, StoreApi, Subscription, Update, select};
pub use value::{Path, Value};

/// A store with every capability installed.
pub type BoundStore = ActionsLayer<DraftLayer<Store>>;

/// Build a [`BoundStore`] with the default configuration.
pub fn create(fields: FieldMap) -> Result<BoundStore> {
    create_with(StoreConfig::default(), fields)
}

/// Partition `fields`, seed the core and stack the draft and actions layers.
pub fn create_with(config: StoreConfig, fields: FieldMap) -> Result<BoundStore> {
    let Partition { state, actions } = partition(fields);
    Ok(Pipeline::new(Store::with_config(config, state))
        .layer(WithDraft)?
        .layer(WithActions::new(actions))?
        .build())
}
