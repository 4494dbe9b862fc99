//! 配置校验模块
//!
//! 校验规则：
//! - consumer name 非空且唯一
//! - 队列容量 > 0
//! - 缓冲区大小 > 0，且能容纳单帧
//! - frames > 0，width / height > 0
//! - fail_every > 0 (若设置)

use std::collections::HashSet;

use contracts::{ContractError, RelayConfig};

/// 校验 RelayConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &RelayConfig) -> Result<(), ContractError> {
    validate_consumer_names(config)?;
    validate_consumers(config)?;
    validate_policy(config)?;
    validate_buffer(config)?;
    validate_acquisition(config)?;
    Ok(())
}

/// 校验 consumer name 唯一性
fn validate_consumer_names(config: &RelayConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, consumer) in config.consumers.iter().enumerate() {
        if consumer.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("consumers[{idx}].name"),
                "consumer name cannot be empty",
            ));
        }
        if !seen.insert(consumer.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("consumers[name={}]", consumer.name),
                "duplicate consumer name",
            ));
        }
    }
    Ok(())
}

/// 校验 consumer 故障注入参数
fn validate_consumers(config: &RelayConfig) -> Result<(), ContractError> {
    for consumer in &config.consumers {
        if consumer.fail_every == Some(0) {
            return Err(ContractError::config_validation(
                format!("consumers[{}].fail_every", consumer.name),
                "fail_every must be > 0",
            ));
        }
    }
    Ok(())
}

/// 校验队列容量
fn validate_policy(config: &RelayConfig) -> Result<(), ContractError> {
    let policy = &config.policy;
    if policy.critical_queue == 0 {
        return Err(ContractError::config_validation(
            "policy.critical_queue",
            "critical_queue must be > 0",
        ));
    }
    if policy.observer_queue == 0 {
        return Err(ContractError::config_validation(
            "policy.observer_queue",
            "observer_queue must be > 0",
        ));
    }
    Ok(())
}

/// 校验缓冲区大小
fn validate_buffer(config: &RelayConfig) -> Result<(), ContractError> {
    if config.buffer.size_mb == 0 {
        return Err(ContractError::config_validation(
            "buffer.size_mb",
            "size_mb must be > 0",
        ));
    }
    Ok(())
}

/// 校验采集参数，单帧必须能放进缓冲区
fn validate_acquisition(config: &RelayConfig) -> Result<(), ContractError> {
    let acq = &config.acquisition;
    if acq.frames == 0 {
        return Err(ContractError::config_validation(
            "acquisition.frames",
            "frames must be > 0",
        ));
    }
    if acq.width == 0 || acq.height == 0 {
        return Err(ContractError::config_validation(
            "acquisition.width / acquisition.height",
            format!("frame size must be > 0, got {}x{}", acq.width, acq.height),
        ));
    }

    let frame_bytes = acq.frame_bytes().ok_or_else(|| {
        ContractError::config_validation("acquisition", "frame size overflows")
    })?;
    let buffer_bytes = config.buffer.size_bytes();
    if frame_bytes > buffer_bytes {
        return Err(ContractError::config_validation(
            "acquisition",
            format!("frame of {frame_bytes} bytes does not fit in a {buffer_bytes} byte buffer"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        AcquisitionConfig, BufferConfig, ConfigVersion, ConsumerConfig, ConsumerKind, DType,
        RunPolicy,
    };

    fn consumer(name: &str) -> ConsumerConfig {
        ConsumerConfig {
            name: name.into(),
            kind: ConsumerKind::Log,
            critical: false,
            delay_ms: 0,
            fail_every: None,
        }
    }

    fn minimal_config() -> RelayConfig {
        RelayConfig {
            version: ConfigVersion::V1,
            buffer: BufferConfig {
                size_mb: 1,
                overwrite_on_overflow: true,
            },
            policy: RunPolicy::default(),
            acquisition: AcquisitionConfig {
                frames: 10,
                width: 64,
                height: 64,
                dtype: DType::U16,
                interval_ms: 0,
            },
            consumers: vec![consumer("writer"), consumer("viewer")],
        }
    }

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_duplicate_consumer_name() {
        let mut config = minimal_config();
        config.consumers.push(consumer("writer"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_consumer_name() {
        let mut config = minimal_config();
        config.consumers[1].name = "  ".into();
        assert_eq!(field_of(validate(&config).unwrap_err()), "consumers[1].name");
    }

    #[test]
    fn test_zero_queue_capacity() {
        let mut config = minimal_config();
        config.policy.observer_queue = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "policy.observer_queue"
        );
    }

    #[test]
    fn test_frame_larger_than_buffer() {
        let mut config = minimal_config();
        config.acquisition.width = 1024;
        config.acquisition.height = 1024;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }

    #[test]
    fn test_zero_frames_and_buffer() {
        let mut config = minimal_config();
        config.acquisition.frames = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "acquisition.frames"
        );

        let mut config = minimal_config();
        config.buffer.size_mb = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "buffer.size_mb");
    }

    #[test]
    fn test_fail_every_zero() {
        let mut config = minimal_config();
        config.consumers[0].fail_every = Some(0);
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "consumers[writer].fail_every"
        );
    }
}
