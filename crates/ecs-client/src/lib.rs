//! Alibaba Cloud ECS Client
//!
//! A small client for the ECS and VPC RPC APIs, covering what the ACK
//! infrastructure provider needs: instance lifecycle and network lookups.
//!
//! # Example
//!
//! ```no_run
//! use ecs_client::{EcsClient, EcsClientTrait, InstanceLookup};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = EcsClient::new(
//!     "cn-hangzhou".to_string(),
//!     "access-key-id".to_string(),
//!     "access-key-secret".to_string(),
//! )?;
//!
//! let lookup = InstanceLookup::for_machine("cn-hangzhou", "default", "worker-0");
//! if let Some(instance) = client.find_instance(&lookup).await? {
//!     println!("{} is {}", instance.id, instance.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod ecs_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::EcsClient;
pub use common::{Credentials, RpcClient};
pub use error::EcsError;
pub use models::*;
pub use ecs_trait::EcsClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockEcsClient;
