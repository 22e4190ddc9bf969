//! 浏览器连接
//!
//! 只有入口程序会用到；流程层通过 `JsExecutor` 间接使用 page。

pub mod connection;

pub use connection::BrowserSession;
