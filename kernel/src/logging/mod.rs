// kernel/src/logging/mod.rs
//
// 役割:
// - 診断出力の入口。VGA テキスト + COM1 シリアルに 1 行ずつ出す。
//
// API:
// - info / warn / error: 通常ログ（lock を取る）
// - info_u64 / info_hex / error_hex: ラベル付き数値（アドレスは hex で出す）
// - fatal / fatal_hex: lock を取らない緊急出力（例外ハンドラ・fail-stop 直前用）
//
// ホストテスト:
// - 出力先はスレッドごとのバッファになり、captured() で取り出せる。

#[cfg(not(test))]
mod serial;
#[cfg(not(test))]
mod vga;

#[cfg(not(test))]
pub fn init() {
    vga::init();
    serial::init();
}

#[cfg(test)]
pub fn init() {}

pub fn info(msg: &str) {
    emit("[INFO] ", &[msg]);
}

pub fn warn(msg: &str) {
    emit("[WARN] ", &[msg]);
}

pub fn error(msg: &str) {
    emit("[ERROR] ", &[msg]);
}

pub fn info_u64(label: &str, value: u64) {
    let mut buf = [0u8; 21];
    let s = u64_to_decimal(value, &mut buf);
    emit("[INFO] ", &[label, " = ", s]);
}

pub fn info_hex(label: &str, value: u64) {
    let mut buf = [0u8; 18];
    let s = u64_to_hex(value, &mut buf);
    emit("[INFO] ", &[label, " = ", s]);
}

pub fn error_hex(label: &str, value: u64) {
    let mut buf = [0u8; 18];
    let s = u64_to_hex(value, &mut buf);
    emit("[ERROR] ", &[label, " = ", s]);
}

/// lock 無しの緊急出力（debugcon 0xE9 + COM1）
pub fn fatal(msg: &str) {
    emit_fatal(&[msg]);
}

pub fn fatal_hex(label: &str, value: u64) {
    let mut buf = [0u8; 18];
    let s = u64_to_hex(value, &mut buf);
    emit_fatal(&[label, " = ", s]);
}

#[cfg(not(test))]
fn emit(prefix: &str, parts: &[&str]) {
    vga::write_parts_line(prefix, parts);
    serial::write_parts_line(prefix, parts);
}

#[cfg(not(test))]
fn emit_fatal(parts: &[&str]) {
    serial::emergency_write_str("[FATAL] ");
    for p in parts {
        serial::emergency_write_str(p);
    }
    serial::emergency_write_str("\r\n");
}

#[cfg(test)]
fn emit(prefix: &str, parts: &[&str]) {
    capture::push(prefix, parts);
}

#[cfg(test)]
fn emit_fatal(parts: &[&str]) {
    capture::push("[FATAL] ", parts);
}

/// テストで出力された行（このスレッド分）を取り出す
#[cfg(test)]
pub fn captured() -> std::vec::Vec<std::string::String> {
    capture::take()
}

#[cfg(test)]
mod capture {
    use std::cell::RefCell;
    use std::string::String;
    use std::vec::Vec;

    std::thread_local! {
        static LINES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    pub fn push(prefix: &str, parts: &[&str]) {
        let mut line = String::from(prefix);
        for p in parts {
            line.push_str(p);
        }
        LINES.with(|l| l.borrow_mut().push(line));
    }

    pub fn take() -> Vec<String> {
        LINES.with(|l| core::mem::take(&mut *l.borrow_mut()))
    }
}

fn u64_to_decimal(mut value: u64, buf: &mut [u8; 21]) -> &str {
    if value == 0 {
        let last = buf.len() - 1;
        buf[last] = b'0';
        return ascii_str(&buf[last..]);
    }

    let mut i = buf.len();
    while value > 0 {
        let digit = (value % 10) as u8;
        i -= 1;
        buf[i] = b'0' + digit;
        value /= 10;
    }

    ascii_str(&buf[i..])
}

/// 0x + 16 桁固定（アドレスを桁揃えで読むため）
fn u64_to_hex(value: u64, buf: &mut [u8; 18]) -> &str {
    buf[0] = b'0';
    buf[1] = b'x';
    for i in 0..16 {
        let n = ((value >> ((15 - i) * 4)) & 0xF) as u8;
        buf[2 + i] = if n < 10 { b'0' + n } else { b'a' + (n - 10) };
    }
    ascii_str(&buf[..])
}

fn ascii_str(bytes: &[u8]) -> &str {
    // 上の変換は ASCII しか書かない
    core::str::from_utf8(bytes).unwrap_or("?")
}
