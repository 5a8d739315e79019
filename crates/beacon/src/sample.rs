// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Samples exchanged over the transport.
//!
//! Each sample is serialized on its own into the payload of one datagram. Optional fields
//! default when absent so peers announcing less information still decode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::logging::level::LogLevel;

/// What an announcement is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Process,
    Publisher,
    Subscriber,
    Service,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    #[default]
    Register,
    Unregister,
}

/// Structural description of a message type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeInformation {
    pub name: String,
    #[serde(default)]
    pub encoding: String,
    /// Schema of the type, empty when the announcer did not know it
    #[serde(default)]
    pub descriptor: String,
}

impl TypeInformation {
    pub fn new(name: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            encoding: encoding.into(),
            descriptor: String::new(),
        }
    }

    #[must_use]
    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = descriptor.into();
        self
    }

    /// Whether two descriptions can describe the same type.
    ///
    /// Names must match. Encodings and descriptors must match when both sides know them;
    /// an empty field is partial information and matches anything.
    #[must_use]
    pub fn is_compatible(&self, other: &TypeInformation) -> bool {
        fn agrees(a: &str, b: &str) -> bool {
            a.is_empty() || b.is_empty() || a == b
        }
        self.name == other.name
            && agrees(&self.encoding, &other.encoding)
            && agrees(&self.descriptor, &other.descriptor)
    }
}

/// One callable method of an announced service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(default)]
    pub request_type: TypeInformation,
    #[serde(default)]
    pub response_type: TypeInformation,
}

/// Periodically broadcast advertisement of a local entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(default)]
    pub command: Command,
    pub kind: EntityKind,
    pub host_name: String,
    pub process_id: u32,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub unit_name: String,
    /// Topic, service or process name
    pub entity_name: String,
    /// Distinguishes several entities with the same name inside one process
    #[serde(default)]
    pub entity_id: String,
    /// Services only
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
    /// Where the entity can be reached, e.g. `tcp://10.0.0.7:40123`
    #[serde(default)]
    pub location: String,
}

impl Announcement {
    /// The announcement that withdraws this entity.
    #[must_use]
    pub fn to_unregister(&self) -> Self {
        Self {
            command: Command::Unregister,
            ..self.clone()
        }
    }
}

/// A diagnostic record as distributed between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Microseconds since the Unix epoch
    pub timestamp: i64,
    pub host_name: String,
    pub process_id: u32,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub unit_name: String,
    pub level: LogLevel,
    pub message: String,
}

pub fn encode<T: Serialize>(sample: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(sample)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}
