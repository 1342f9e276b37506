pub mod backup;
pub mod diagnostics;
pub mod freeradius;
pub mod install;
pub mod nas;
pub mod openvpn;
pub mod postgres;
pub mod systemd;
pub mod users;
