// 🛡️ Zero-Trust Architecture: concrete managers live here, the CLI only sees the traits.

pub mod traits;     // Global contracts
pub mod files;      // Atomic writes
pub mod envfile;    // /etc/environment
pub mod systemd;    // Service drop-ins
pub mod logs;       // Log sources for diagnostics

/// Writing under /etc as a regular user fails late with EACCES; say so up front.
pub fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}
