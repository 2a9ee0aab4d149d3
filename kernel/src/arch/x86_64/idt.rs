// Interrupt Descriptor Table

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::{PrivilegeLevel, VirtAddr};

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        // Add timer interrupt handler (IRQ0 = interrupt 32)
        idt[32].set_handler_fn(timer_interrupt_handler);
        // Keyboard (IRQ1 = interrupt 33)
        idt[33].set_handler_fn(keyboard_interrupt_handler);
        // ATA primary/secondary channels (IRQ14/15 = interrupts 0x2e/0x2f)
        idt[0x2e].set_handler_fn(ata_primary_interrupt_handler);
        idt[0x2f].set_handler_fn(ata_secondary_interrupt_handler);
        // Syscall gate (§4.H): registered at DPL 3 so `int 0x80` from ring 3
        // doesn't fault. The handler's calling convention is hand-rolled
        // (it needs to control the exact register push order), so it's
        // installed by raw address rather than `set_handler_fn`.
        unsafe {
            idt[0x80]
                .set_handler_addr(VirtAddr::new(
                    crate::arch::x86_64::syscall_entry::syscall_isr as u64,
                ))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }
        idt
    };
}

#[allow(dead_code)]
pub fn init() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    let cr2 = Cr2::read().unwrap_or(x86_64::VirtAddr::zero()).as_u64();
    let info = crate::mm::page_fault::from_x86_64(
        error_code.bits(),
        cr2,
        stack_frame.instruction_pointer.as_u64(),
    );

    if crate::mm::page_fault::handle_page_fault(info).is_ok() {
        return;
    }

    println!("EXCEPTION: PAGE FAULT");
    println!("Accessed Address: {:#x}", cr2);
    println!("Error Code: {:?}", error_code);
    println!("{:#?}", stack_frame);
    panic!("Unrecoverable page fault");
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    println!("EXCEPTION: GENERAL PROTECTION FAULT");
    println!("Error Code: {:#x}", error_code);
    println!("{:#?}", stack_frame);
    panic!("General protection fault");
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::arch::x86_64::timer::tick();
    crate::arch::x86_64::send_eoi(0);
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::drivers::keyboard::on_irq();
    crate::arch::x86_64::send_eoi(1);
}

extern "x86-interrupt" fn ata_primary_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::drivers::storage::handle_irq(0x2e);
    crate::arch::x86_64::send_eoi(14);
}

extern "x86-interrupt" fn ata_secondary_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::drivers::storage::handle_irq(0x2f);
    crate::arch::x86_64::send_eoi(15);
}
