/// 新连接速率限制
///
/// 使用 token bucket 算法限制接入的新客户端连接
use crate::config::RateLimitConfig;
use crate::error::{RelayError, Result};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// 速率限制器（克隆后共享同一个令牌桶）
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    inner: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: RateLimitConfig,
}

impl ConnectionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        let rate = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            RelayError::config_error("rate_limit.requests_per_second must be greater than 0")
        })?;
        let burst = NonZeroU32::new(config.burst_size)
            .ok_or_else(|| RelayError::config_error("rate_limit.burst_size must be greater than 0"))?;

        let quota = Quota::per_second(rate).allow_burst(burst);

        Ok(Self {
            inner: Arc::new(GovernorLimiter::direct(quota)),
            config,
        })
    }

    /// 尝试接纳一个新连接（非阻塞）
    /// 被限流时返回 Err(Duration)，表示需要等待的时间
    pub fn check(&self) -> std::result::Result<(), Duration> {
        match self.inner.check() {
            Ok(_) => Ok(()),
            Err(not_until) => Err(not_until.wait_time_from(DefaultClock::default().now())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
