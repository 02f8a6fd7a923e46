/// 应用层服务模块
/// 包含握手轮询服务与外部控制器侧的高阶客户端

/// 握手服务模块
pub mod handshake_service;

/// 角度校正高阶客户端模块
pub mod correction_client;

pub use correction_client::CorrectionClient;
pub use handshake_service::HandshakeService;
