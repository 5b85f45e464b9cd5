// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Class-tagged resource objects.
//!
//! Resources travel as `{"__class", "__version", "data"}`. Decoding never
//! rejects unknown fields inside `data`, so an older consumer can read what
//! a newer producer wrote.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorError;

/// A resource type that can cross the wire with its class tag.
pub trait Tagged: Serialize + DeserializeOwned {
    const CLASS: &'static str;
    const VERSION: &'static str = "1.0";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedObject {
    #[serde(rename = "__class")]
    pub class: String,
    #[serde(rename = "__version")]
    pub version: String,
    pub data: Value,
}

pub fn tag<T: Tagged>(obj: &T) -> Result<Value, StorError> {
    let tagged = TaggedObject {
        class: T::CLASS.to_string(),
        version: T::VERSION.to_string(),
        data: serde_json::to_value(obj)?,
    };
    Ok(serde_json::to_value(tagged)?)
}

pub fn untag<T: Tagged>(value: Value) -> Result<T, StorError> {
    let tagged: TaggedObject = serde_json::from_value(value)?;
    if tagged.class != T::CLASS {
        return Err(StorError::serialization(format!(
            "expected {} object, got {}",
            T::CLASS,
            tagged.class
        )));
    }
    Ok(serde_json::from_value(tagged.data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PoolV2 {
        id: i64,
        display_name: String,
        osd_num: u32,
    }

    impl Tagged for PoolV2 {
        const CLASS: &'static str = "Pool";
        const VERSION: &'static str = "1.2";
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PoolV1 {
        id: i64,
        display_name: String,
    }

    impl Tagged for PoolV1 {
        const CLASS: &'static str = "Pool";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Disk {
        id: i64,
    }

    impl Tagged for Disk {
        const CLASS: &'static str = "Disk";
    }

    #[test]
    fn test_tag_shape() {
        let value = tag(&PoolV2 {
            id: 1,
            display_name: "p1".into(),
            osd_num: 3,
        })
        .unwrap();
        assert_eq!(value["__class"], "Pool");
        assert_eq!(value["__version"], "1.2");
        assert_eq!(value["data"]["osd_num"], 3);
    }

    #[test]
    fn test_older_consumer_ignores_new_fields() {
        let value = tag(&PoolV2 {
            id: 1,
            display_name: "p1".into(),
            osd_num: 3,
        })
        .unwrap();
        let old: PoolV1 = untag(value).unwrap();
        assert_eq!(
            old,
            PoolV1 {
                id: 1,
                display_name: "p1".into()
            }
        );
    }

    #[test]
    fn test_class_mismatch_rejected() {
        let value = tag(&Disk { id: 2 }).unwrap();
        assert!(untag::<PoolV1>(value).is_err());
    }
}
