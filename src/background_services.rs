pub mod session_refresher;
