/// Effective uid 0
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
