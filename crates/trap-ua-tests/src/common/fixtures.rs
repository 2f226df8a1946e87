// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built address spaces and configurations.

use std::sync::Arc;
use std::time::Duration;

use trap_ua::config::{
    ClientConfig, MonitoredItemOptions, ServerConfig, SessionLimits, SubscriptionLimits,
    SubscriptionSettings,
};
use trap_ua::types::NodeId;

use super::mocks::MemoryAddressSpace;

/// Namespace used by the plant fixtures.
pub const PLANT_NS: u16 = 2;

/// Number of tag variables under the tag folder.
pub const TAG_COUNT: usize = 25;

// =============================================================================
// Address Space Fixtures
// =============================================================================

/// Well-known nodes of the plant address space.
pub struct PlantFixtures;

impl PlantFixtures {
    /// `Objects/Line1`.
    pub fn line() -> NodeId {
        NodeId::string(PLANT_NS, "Line1")
    }

    /// `Objects/Line1/Temperature`, initially 21.5.
    pub fn temperature() -> NodeId {
        NodeId::string(PLANT_NS, "Line1.Temperature")
    }

    /// `Objects/Line1/Speed`, initially 1200.
    pub fn speed() -> NodeId {
        NodeId::string(PLANT_NS, "Line1.Speed")
    }

    /// `Objects/Line1/Serial`, read-only.
    pub fn serial() -> NodeId {
        NodeId::string(PLANT_NS, "Line1.Serial")
    }

    /// `Objects/Tags`, holding [`TAG_COUNT`] variables.
    pub fn tags() -> NodeId {
        NodeId::string(PLANT_NS, "Tags")
    }

    /// `Objects/Tags/Tag{index}`.
    pub fn tag(index: usize) -> NodeId {
        NodeId::string(PLANT_NS, format!("Tags.Tag{index:02}"))
    }

    /// Builds the plant with a change feed.
    pub fn plant() -> Arc<MemoryAddressSpace> {
        Arc::new(Self::populate(MemoryAddressSpace::new()))
    }

    /// Builds the plant without a change feed.
    pub fn polling_plant() -> Arc<MemoryAddressSpace> {
        Arc::new(Self::populate(MemoryAddressSpace::polling()))
    }

    fn populate(space: MemoryAddressSpace) -> MemoryAddressSpace {
        let objects = NodeId::OBJECTS_FOLDER;
        let line = space.add_object(&objects, Self::line(), "Line1");
        space.add_variable(&line, Self::temperature(), "Temperature", 21.5);
        space.add_variable(&line, Self::speed(), "Speed", 1200i32);
        space.add_variable(&line, Self::serial(), "Serial", "SN-0001");
        space.set_read_only(&Self::serial());

        let tags = space.add_object(&objects, Self::tags(), "Tags");
        for index in 0..TAG_COUNT {
            space.add_variable(&tags, Self::tag(index), &format!("Tag{index:02}"), index as i32);
        }
        space
    }
}

// =============================================================================
// Configuration Fixtures
// =============================================================================

/// Configurations tuned for fast tests.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Loopback server on an ephemeral port with short housekeeping periods.
    pub fn server() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.endpoint_url = "opc.tcp://127.0.0.1:0".to_string();
        config.channel.hello_timeout = Duration::from_secs(2);
        config.sessions = SessionLimits {
            sweep_interval: Duration::from_millis(50),
            channel_loss_grace: Duration::from_secs(5),
            ..SessionLimits::default()
        };
        config.subscriptions = SubscriptionLimits {
            min_publishing_interval: Duration::from_millis(20),
            min_sampling_interval: Duration::from_millis(5),
            ..SubscriptionLimits::default()
        };
        config
    }

    /// Client with short timeouts.
    pub fn client() -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        }
    }

    /// Subscription publishing every `interval`.
    pub fn subscription(interval: Duration) -> SubscriptionSettings {
        SubscriptionSettings::with_interval(interval)
    }

    /// Event-driven value item with the given queue.
    pub fn queued_item(queue_size: u32, discard_oldest: bool) -> MonitoredItemOptions {
        MonitoredItemOptions::default().queue(queue_size, discard_oldest)
    }
}
