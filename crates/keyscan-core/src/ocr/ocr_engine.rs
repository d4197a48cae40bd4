use crate::error::Result;
use crate::preprocess::PreparedImage;
use async_trait::async_trait;

/// OCR 引擎接口
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// 识别图像中的文本，按阅读顺序返回文本片段
    async fn recognize(&self, image: &PreparedImage) -> Result<Vec<String>>;

    /// 返回引擎名称
    fn name(&self) -> &str;

    /// 引擎当前是否可用（可执行文件存在、服务可连接等）
    async fn is_available(&self) -> bool {
        true
    }
}
