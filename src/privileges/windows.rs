/// Check if the process token belongs to an elevated administrator
pub fn is_admin() -> bool {
    use winapi::um::shellapi::IsUserAnAdmin;
    unsafe { IsUserAnAdmin() != 0 }
}
