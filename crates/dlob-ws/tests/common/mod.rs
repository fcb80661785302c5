pub mod mock_ws;

pub use mock_ws::MockWsServer;
