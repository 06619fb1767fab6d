//! Host interface addresses, listed by `--ips` to help pick a `bind_ip`.

use std::ffi::CStr;
use std::io;
use std::net::Ipv4Addr;
use std::ptr;

/// Every IPv4 address assigned to a host interface, paired with the
/// interface name, in the order the kernel reports them.
pub fn host_ipv4_addresses() -> io::Result<Vec<(String, Ipv4Addr)>> {
    let mut head: *mut libc::ifaddrs = ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut found = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // The list stays valid until freeifaddrs below.
        let entry = unsafe { &*cursor };
        if !entry.ifa_addr.is_null()
            && i32::from(unsafe { (*entry.ifa_addr).sa_family }) == libc::AF_INET
        {
            let sin = unsafe { &*entry.ifa_addr.cast::<libc::sockaddr_in>() };
            let addr = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            let name = unsafe { CStr::from_ptr(entry.ifa_name) }
                .to_string_lossy()
                .into_owned();
            found.push((name, addr));
        }
        cursor = entry.ifa_next;
    }

    unsafe { libc::freeifaddrs(head) };
    Ok(found)
}

/// One line per address, then the wildcard that covers them all.
pub fn describe(addresses: &[(String, Ipv4Addr)]) -> Vec<String> {
    addresses
        .iter()
        .map(|(name, addr)| format!("{} ({})", addr, name))
        .chain(std::iter::once(format!(
            "{} (all above)",
            Ipv4Addr::UNSPECIFIED
        )))
        .collect()
}
