// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registry of type signatures seen per service method.
//!
//! The first description of a method fixes its signature for as long as it keeps being
//! re-described. A conflicting description is reported and leaves the recorded one in
//! place; once the recorded signature expires, the next description starts over.

use std::time::Duration;

use tracing::warn;

use crate::registry::ExpiringRegistry;
use crate::sample::TypeInformation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodTypes {
    pub request: TypeInformation,
    pub response: TypeInformation,
}

impl MethodTypes {
    fn is_compatible(&self, other: &MethodTypes) -> bool {
        self.request.is_compatible(&other.request) && self.response.is_compatible(&other.response)
    }

    /// Keeps the more detailed of two compatible descriptions, field by field.
    fn merged_with(self, recorded: &MethodTypes) -> MethodTypes {
        fn richer(new: TypeInformation, old: &TypeInformation) -> TypeInformation {
            TypeInformation {
                encoding: if new.encoding.is_empty() {
                    old.encoding.clone()
                } else {
                    new.encoding
                },
                descriptor: if new.descriptor.is_empty() {
                    old.descriptor.clone()
                } else {
                    new.descriptor
                },
                name: new.name,
            }
        }
        MethodTypes {
            request: richer(self.request, &recorded.request),
            response: richer(self.response, &recorded.response),
        }
    }
}

#[derive(Debug)]
pub struct TypeDescriptionGate {
    methods: ExpiringRegistry<(String, String), MethodTypes>,
}

impl TypeDescriptionGate {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            methods: ExpiringRegistry::new(ttl),
        }
    }

    /// Records the signature of `service_name.method_name`.
    ///
    /// Returns `true` if it is consistent with what was recorded (or nothing was), which
    /// also refreshes the record. Returns `false` on a conflict.
    pub fn apply(&self, service_name: &str, method_name: &str, types: MethodTypes) -> bool {
        let key = (service_name.to_string(), method_name.to_string());
        let accepted = self.methods.upsert_with(key, |recorded| match recorded {
            None => Some(types.clone()),
            Some(recorded) if recorded.is_compatible(&types) => {
                Some(types.clone().merged_with(recorded))
            }
            Some(_) => None,
        });
        if !accepted {
            warn!(
                "Conflicting type description for {}.{}: request '{}', response '{}'",
                service_name, method_name, types.request.name, types.response.name
            );
        }
        accepted
    }

    #[must_use]
    pub fn get(&self, service_name: &str, method_name: &str) -> Option<MethodTypes> {
        self.methods
            .get(&(service_name.to_string(), method_name.to_string()))
    }

    pub fn expire(&self) -> usize {
        self.methods.expire()
    }
}
