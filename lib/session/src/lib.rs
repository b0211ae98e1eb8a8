mod echo;
mod proxy;

pub use echo::EchoSession;
pub use proxy::ProxySession;
