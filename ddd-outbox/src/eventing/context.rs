use tokio_util::sync::CancellationToken;

/// 处理器上下文：携带可取消信号，处理器可据此提前结束长耗时工作
#[derive(Clone, Debug, Default)]
pub struct HandlerContext {
    cancellation: CancellationToken,
}

impl HandlerContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
