// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Useful JSON Schema definitions

use schemars::{
    JsonSchema,
    r#gen::{SchemaGenerator, SchemaSettings},
    schema::{InstanceType, RootSchema, Schema, SchemaObject},
};

use crate::RootConfig;

/// A network hostname
pub struct Hostname;

impl JsonSchema for Hostname {
    fn schema_name() -> String {
        "Hostname".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        hostname(generator)
    }
}

fn hostname(_gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        format: Some("hostname".to_owned()),
        ..SchemaObject::default()
    })
}

/// Generate the JSON schema of the configuration file
#[must_use]
pub fn root_schema() -> RootSchema {
    SchemaSettings::draft07()
        .with(|settings| settings.option_add_null_type = false)
        .into_generator()
        .into_root_schema_for::<RootConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_schema() {
        let schema = serde_json::to_value(root_schema()).unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("database").is_some());
        assert!(properties.get("retention").is_some());
        assert_eq!(schema["definitions"]["Hostname"]["format"], "hostname");
        assert!(schema["definitions"].get("Collection").is_some());
    }
}
