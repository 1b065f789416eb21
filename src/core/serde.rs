use serde::{Serialize, Deserialize, Serializer, Deserializer};
use std::time::{SystemTime, Duration, UNIX_EPOCH};

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!("invalid duration: {}", secs)));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Serializes an optional SystemTime as seconds since UNIX_EPOCH
pub fn serialize_opt_time<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    time.map(|t| {
        t.duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_secs_f64()
    })
    .serialize(serializer)
}

/// Deserializes an optional SystemTime from seconds since UNIX_EPOCH
pub fn deserialize_opt_time<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<f64>::deserialize(deserializer)?;
    Ok(secs
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| UNIX_EPOCH + Duration::from_secs_f64(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_opt_time_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_opt_time")]
            #[serde(deserialize_with = "deserialize_opt_time")]
            time: Option<SystemTime>,
        }

        let original = Test {
            time: Some(SystemTime::now()),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: Test = serde_json::from_str(&serialized).unwrap();

        let diff = deserialized.time.unwrap()
            .duration_since(original.time.unwrap())
            .unwrap_or_else(|e| e.duration());

        assert!(diff < Duration::from_millis(1));

        let empty = Test { time: None };
        let serialized = serde_json::to_string(&empty).unwrap();
        let deserialized: Test = serde_json::from_str(&serialized).unwrap();
        assert!(deserialized.time.is_none());
    }

    #[test]
    fn test_negative_duration_rejected() {
        #[derive(Deserialize)]
        struct Test {
            #[serde(deserialize_with = "deserialize_duration")]
            #[allow(dead_code)]
            interval: Duration,
        }

        assert!(serde_json::from_str::<Test>(r#"{"interval": -1.0}"#).is_err());
        assert!(serde_json::from_str::<Test>(r#"{"interval": 0.085}"#).is_ok());
    }
}
