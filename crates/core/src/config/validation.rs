use crate::{SchedulerError, SchedulerResult};

/// 配置验证接口
pub trait ConfigValidator {
    fn validate(&self) -> SchedulerResult<()>;
}

/// 通用验证工具
pub struct ValidationUtils;

impl ValidationUtils {
    /// 字符串不能为空
    pub fn validate_not_empty(value: &str, field_name: &str) -> SchedulerResult<()> {
        if value.trim().is_empty() {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} 不能为空"
            )));
        }
        Ok(())
    }

    /// 数值必须大于 0
    pub fn validate_positive(value: u64, field_name: &str) -> SchedulerResult<()> {
        if value == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} 必须大于 0"
            )));
        }
        Ok(())
    }

    /// 数量必须在 1..=max 范围内
    pub fn validate_count(count: usize, field_name: &str, max: usize) -> SchedulerResult<()> {
        if count == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} 必须大于 0"
            )));
        }
        if count > max {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} 不能超过 {max}"
            )));
        }
        Ok(())
    }
}
