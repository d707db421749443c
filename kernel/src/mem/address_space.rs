// kernel/src/mem/address_space.rs
//
// 役割:
// - タスク 1 つ分のアドレス空間（L4 root から下の階層）を組み立てる。
// - TaskImage で「どこに何をロードするか」を受け取り、検証済みの値だけを扱う。
//
// build の手順:
// 1. ゼロクリアした root を確保し、すぐに task.root に入れる
// 2. [load_vaddr, bss_end_vaddr) を 4KiB ずつ [load_paddr, ...) に map する
// 3. bss（ファイルに無い部分）の物理範囲をゼロクリアする
// 4. カーネル領域を splice: 現在の L4[0] → L3[0] をタスクの L3[0] にコピー
//    （イメージが [0, 1GiB) にあると、その L3[0] は覆われる。警告だけ出して続ける）
// 5. higher half（L4[256..512]）を現在の階層からコピー
//    （bootloader が physmap とカーネルスタックをここに置いているため）
//
// やらないこと:
// - 失敗時の巻き戻し（確保済みのテーブルや task.root はそのまま残る）
// - unmap / fork 的な複製

use x86_64::structures::paging::PageTableIndex;

use crate::arch::cpu::ControlRegisters;
use crate::logging;
use crate::mem::addr::{PhysAddr, PhysFrame, VirtAddr};
use crate::mem::layout::{HIGHER_HALF_L4_INDEX, KERNEL_SPACE_END, USER_SPACE_END};
use crate::mem::mapper::{map, MapError};
use crate::mem::paging::{EntryExt, PageFlags, PageLevel};
use crate::mem::phys::PhysWindow;
use crate::mm::pagetable_init::allocate_table;
use crate::mm::{FrameError, FramePool};
use crate::types::{ENTRY_COUNT, PAGE_SIZE, PHYS_ADDR_LIMIT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageError {
    /// load_vaddr / load_paddr が 4KiB 境界でない
    Unaligned,
    /// load_end_paddr < load_paddr、またはファイル部分が bss_end を越える
    InvertedRange,
    /// 仮想側が canonical な low half に、物理側が 52bit に収まらない
    NonCanonical,
}

impl ImageError {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageError::Unaligned => "ImageError::Unaligned",
            ImageError::InvertedRange => "ImageError::InvertedRange",
            ImageError::NonCanonical => "ImageError::NonCanonical",
        }
    }
}

/// タスクのロード情報（ローダから受け取る）
///
/// 前提（呼び出し側の契約）:
/// - 物理 `[load_paddr, load_paddr + (bss_end_vaddr - load_vaddr))` は連続していて、
///   このタスクだけが所有している。bss も load_end_paddr からそのまま続く。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskImage {
    load_vaddr: VirtAddr,
    load_paddr: PhysAddr,
    load_end_paddr: PhysAddr,
    bss_end_vaddr: VirtAddr,
}

impl TaskImage {
    pub fn new(
        load_vaddr: VirtAddr,
        load_paddr: PhysAddr,
        load_end_paddr: PhysAddr,
        bss_end_vaddr: VirtAddr,
    ) -> Result<Self, ImageError> {
        if !load_vaddr.is_page_aligned() || !load_paddr.is_page_aligned() {
            return Err(ImageError::Unaligned);
        }

        let file_size = load_end_paddr
            .0
            .checked_sub(load_paddr.0)
            .ok_or(ImageError::InvertedRange)?;
        let file_end = load_vaddr.0.checked_add(file_size).ok_or(ImageError::NonCanonical)?;
        if file_end > bss_end_vaddr.0 {
            return Err(ImageError::InvertedRange);
        }

        if bss_end_vaddr.0 > USER_SPACE_END {
            return Err(ImageError::NonCanonical);
        }
        let data_size = bss_end_vaddr.0 - load_vaddr.0;
        match load_paddr.0.checked_add(data_size) {
            Some(end) if end <= PHYS_ADDR_LIMIT => {}
            _ => return Err(ImageError::NonCanonical),
        }

        Ok(TaskImage {
            load_vaddr,
            load_paddr,
            load_end_paddr,
            bss_end_vaddr,
        })
    }

    pub fn load_vaddr(&self) -> VirtAddr {
        self.load_vaddr
    }

    pub fn load_paddr(&self) -> PhysAddr {
        self.load_paddr
    }

    pub fn load_end_paddr(&self) -> PhysAddr {
        self.load_end_paddr
    }

    pub fn bss_end_vaddr(&self) -> VirtAddr {
        self.bss_end_vaddr
    }

    /// ファイルから読まれる部分のバイト数
    pub fn file_size(&self) -> u64 {
        self.load_end_paddr.0 - self.load_paddr.0
    }

    /// splice で覆われる [0, 1GiB) に重なるか
    pub fn overlaps_kernel_region(&self) -> bool {
        self.load_vaddr.0 < KERNEL_SPACE_END
    }

    /// map される範囲（ファイル + bss）のバイト数
    pub fn data_size(&self) -> u64 {
        self.bss_end_vaddr.0 - self.load_vaddr.0
    }

    pub fn bss_size(&self) -> u64 {
        self.data_size() - self.file_size()
    }
}

/// build の対象。root は build が入れる。
#[derive(Clone, Copy, Debug)]
pub struct Task {
    image: TaskImage,
    root: Option<PhysFrame>,
    complete: bool,
}

impl Task {
    pub fn new(image: TaskImage) -> Self {
        Task {
            image,
            root: None,
            complete: false,
        }
    }

    pub fn image(&self) -> &TaskImage {
        &self.image
    }

    /// build 済み（途中で失敗した場合も含む）なら Some
    pub fn root(&self) -> Option<PhysFrame> {
        self.root
    }

    /// build が最後（higher half の共有）まで成功したか
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildError {
    FrameAllocationFailed,
    ParentEntryHugePage(PageLevel),
    /// 現在の階層に L4[0] が無く、splice するカーネル領域が見つからない
    KernelRegionMissing,
}

impl BuildError {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildError::FrameAllocationFailed => "BuildError::FrameAllocationFailed",
            BuildError::ParentEntryHugePage(_) => "BuildError::ParentEntryHugePage",
            BuildError::KernelRegionMissing => "BuildError::KernelRegionMissing",
        }
    }
}

impl From<FrameError> for BuildError {
    fn from(_: FrameError) -> Self {
        BuildError::FrameAllocationFailed
    }
}

impl From<MapError> for BuildError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::FrameAllocationFailed => BuildError::FrameAllocationFailed,
            MapError::ParentEntryHugePage(level) => BuildError::ParentEntryHugePage(level),
        }
    }
}

const KERNEL_L4: PageTableIndex = PageTableIndex::new(0);
const KERNEL_L3: PageTableIndex = PageTableIndex::new(0);

pub fn build<C: ControlRegisters>(
    task: &mut Task,
    pool: &mut FramePool,
    window: &PhysWindow,
    regs: &C,
) -> Result<(), BuildError> {
    let root = allocate_table(pool, window)?;
    task.root = Some(root);

    let image = task.image;
    let mut offset = 0;
    while offset < image.data_size() {
        let page = (image.load_vaddr + offset).page();
        let frame = (image.load_paddr + offset).frame();
        map(pool, window, root, page, frame)?;
        offset += PAGE_SIZE;
    }

    window.zero_range(image.load_end_paddr, image.bss_size());

    let active = regs.active_root();
    if image.overlaps_kernel_region() {
        logging::warn("address_space: image lies in L4[0] -> L3[0]; the kernel splice shadows it");
        logging::info_hex(" load_vaddr", image.load_vaddr.0);
    }
    splice_kernel(pool, window, root, active)?;
    share_higher_half(window, root, active);
    task.complete = true;

    logging::info_hex("address_space: task built, root", root.start_address().0);
    Ok(())
}

/// 現在の L4[0] → L3[0] をタスクの L3[0] にコピーする。
fn splice_kernel(
    pool: &mut FramePool,
    window: &PhysWindow,
    task_root: PhysFrame,
    active_root: PhysFrame,
) -> Result<(), BuildError> {
    let active_l4 = window.table(active_root).get(KERNEL_L4);
    if !active_l4.is_present() {
        logging::error("address_space: active L4[0] is not present");
        return Err(BuildError::KernelRegionMissing);
    }

    let task_l4 = window.table(task_root);
    let task_l3 = match task_l4.get(KERNEL_L4) {
        e if e.is_present() => e.target(),
        _ => {
            let l3 = allocate_table(pool, window)?;
            task_l4.with_mut(|t| t[KERNEL_L4].point_to(l3, PageFlags::TABLE_DEFAULT));
            l3
        }
    };

    let kernel_entry = window.table(active_l4.target()).get(KERNEL_L3);
    window.table(task_l3).set(KERNEL_L3, kernel_entry);
    Ok(())
}

fn share_higher_half(window: &PhysWindow, task_root: PhysFrame, active_root: PhysFrame) {
    let active = window.table(active_root);
    let task = window.table(task_root);
    for i in HIGHER_HALF_L4_INDEX..ENTRY_COUNT {
        let index = PageTableIndex::new(i as u16);
        let entry = active.get(index);
        if entry.is_present() {
            task.set(index, entry);
        }
    }
}

/// タスクの L4[0] → L3[0] が、現在の階層のものと同じエントリを持っているか
pub fn kernel_region_spliced(window: &PhysWindow, task_root: PhysFrame, active_root: PhysFrame) -> bool {
    let l3_entry = |root: PhysFrame| {
        let l4 = window.table(root).get(KERNEL_L4);
        l4.is_present().then(|| window.table(l4.target()).get(KERNEL_L3))
    };
    match (l3_entry(task_root), l3_entry(active_root)) {
        (Some(task), Some(kernel)) => task.same_as(&kernel),
        _ => false,
    }
}
