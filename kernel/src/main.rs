// kernel/src/main.rs
//
// bootloader の入口。本体は memcore（lib）側にある。
// ホスト向けにビルドしたときは何もしない空の main になる。

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use bootloader::{entry_point, BootInfo};

#[cfg(target_os = "none")]
entry_point!(kernel_main);

#[cfg(target_os = "none")]
fn kernel_main(boot_info: &'static BootInfo) -> ! {
    memcore::kernel::entry::start(boot_info)
}

#[cfg(not(target_os = "none"))]
fn main() {}
