/// Real-mode register image seen by the INT 13h dispatcher.
///
/// Only the registers the disk services read or return are modeled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RealModeCpu {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,

    pub ds: u16,
    pub es: u16,

    pub flags: u32,
}

impl RealModeCpu {
    pub const FLAG_CF: u32 = 1 << 0;

    pub fn carry(&self) -> bool {
        (self.flags & Self::FLAG_CF) != 0
    }

    pub fn set_carry(&mut self, carry: bool) {
        if carry {
            self.flags |= Self::FLAG_CF;
        } else {
            self.flags &= !Self::FLAG_CF;
        }
    }

    pub fn ax(&self) -> u16 {
        self.eax as u16
    }

    pub fn set_ax(&mut self, val: u16) {
        self.eax = (self.eax & 0xFFFF_0000) | (val as u32);
    }

    pub fn ah(&self) -> u8 {
        (self.eax >> 8) as u8
    }

    pub fn set_ah(&mut self, val: u8) {
        self.eax = (self.eax & 0xFFFF_00FF) | ((val as u32) << 8);
    }

    pub fn al(&self) -> u8 {
        self.eax as u8
    }

    pub fn set_al(&mut self, val: u8) {
        self.eax = (self.eax & 0xFFFF_FF00) | (val as u32);
    }

    pub fn bx(&self) -> u16 {
        self.ebx as u16
    }

    pub fn set_bx(&mut self, val: u16) {
        self.ebx = (self.ebx & 0xFFFF_0000) | (val as u32);
    }

    pub fn set_bl(&mut self, val: u8) {
        self.ebx = (self.ebx & 0xFFFF_FF00) | (val as u32);
    }

    pub fn cx(&self) -> u16 {
        self.ecx as u16
    }

    pub fn set_cx(&mut self, val: u16) {
        self.ecx = (self.ecx & 0xFFFF_0000) | (val as u32);
    }

    pub fn dx(&self) -> u16 {
        self.edx as u16
    }

    pub fn set_dx(&mut self, val: u16) {
        self.edx = (self.edx & 0xFFFF_0000) | (val as u32);
    }

    pub fn dh(&self) -> u8 {
        (self.edx >> 8) as u8
    }

    pub fn dl(&self) -> u8 {
        self.edx as u8
    }

    pub fn set_dl(&mut self, val: u8) {
        self.edx = (self.edx & 0xFFFF_FF00) | (val as u32);
    }

    pub fn si(&self) -> u16 {
        self.esi as u16
    }

    pub fn set_di(&mut self, val: u16) {
        self.edi = (self.edi & 0xFFFF_0000) | (val as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_halves_leave_neighbours_intact() {
        let mut cpu = RealModeCpu {
            eax: 0xDEAD_1234,
            edx: 0x0000_0080,
            ..Default::default()
        };
        cpu.set_ah(0x42);
        assert_eq!(cpu.eax, 0xDEAD_4234);
        cpu.set_al(0x00);
        assert_eq!(cpu.ax(), 0x4200);
        assert_eq!(cpu.dl(), 0x80);
        assert_eq!(cpu.dh(), 0x00);
    }

    #[test]
    fn carry_flag_round_trips() {
        let mut cpu = RealModeCpu::default();
        cpu.set_carry(true);
        assert!(cpu.carry());
        cpu.set_carry(false);
        assert_eq!(cpu.flags, 0);
    }
}
