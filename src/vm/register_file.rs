//! Registers of the append VM.
//!
//! `pc` and `ra` are heap addresses (`-1` once execution has returned from the
//! entry block). `fp` and `sp` live in the evaluation stack; the register file
//! only routes reads and writes to them. `s0`/`s1` are saved across calls by
//! convention, `t0`/`t1` are scratch.

use super::stack::{EvaluationStack, StackValue};
use crate::core::{VmError, VmResult};

/// Register numbers as encoded in operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Register {
    Pc = 0,
    Ra = 1,
    Fp = 2,
    Sp = 3,
    S0 = 4,
    S1 = 5,
    T0 = 6,
    T1 = 7,
}

impl Register {
    pub fn from_operand(operand: u32) -> VmResult<Register> {
        Ok(match operand {
            0 => Register::Pc,
            1 => Register::Ra,
            2 => Register::Fp,
            3 => Register::Sp,
            4 => Register::S0,
            5 => Register::S1,
            6 => Register::T0,
            7 => Register::T1,
            operand => return Err(VmError::InvalidRegister { operand }),
        })
    }
}

pub struct RegisterFile {
    pub pc: isize,
    pub ra: isize,
    s0: StackValue,
    s1: StackValue,
    t0: StackValue,
    t1: StackValue,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            pc: -1,
            ra: -1,
            s0: StackValue::Null,
            s1: StackValue::Null,
            t0: StackValue::Null,
            t1: StackValue::Null,
        }
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a register; integer registers read as `Int`.
    pub fn fetch(&self, register: Register, stack: &EvaluationStack) -> StackValue {
        match register {
            Register::Pc => StackValue::Int(self.pc),
            Register::Ra => StackValue::Int(self.ra),
            Register::Fp => StackValue::Int(stack.fp()),
            Register::Sp => StackValue::Int(stack.sp()),
            Register::S0 => self.s0.clone(),
            Register::S1 => self.s1.clone(),
            Register::T0 => self.t0.clone(),
            Register::T1 => self.t1.clone(),
        }
    }

    pub fn load(
        &mut self,
        register: Register,
        value: StackValue,
        stack: &mut EvaluationStack,
    ) -> VmResult<()> {
        match register {
            Register::Pc => self.pc = value.into_int()?,
            Register::Ra => self.ra = value.into_int()?,
            Register::Fp => stack.set_fp(value.into_int()?),
            Register::Sp => stack.set_sp(value.into_int()?)?,
            Register::S0 => self.s0 = value,
            Register::S1 => self.s1 = value,
            Register::T0 => self.t0 = value,
            Register::T1 => self.t1 = value,
        }
        Ok(())
    }

    /// Integer value of `pc`, `ra`, `fp` or `sp`.
    pub fn address(&self, register: Register, stack: &EvaluationStack) -> VmResult<isize> {
        self.fetch(register, stack).into_int()
    }

    pub fn s0(&self) -> &StackValue {
        &self.s0
    }

    pub fn t0(&self) -> &StackValue {
        &self.t0
    }

    pub fn take_t0(&mut self) -> StackValue {
        std::mem::take(&mut self.t0)
    }

    pub fn set_t0(&mut self, value: StackValue) {
        self.t0 = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_operands() {
        assert_eq!(Register::from_operand(4).unwrap(), Register::S0);
        assert!(Register::from_operand(9).is_err());
    }

    #[test]
    fn test_fp_and_sp_route_to_the_stack() {
        let mut registers = RegisterFile::new();
        let mut stack = EvaluationStack::empty();
        stack.push(StackValue::Int(7));
        stack.push(StackValue::Int(8));

        assert_eq!(registers.address(Register::Sp, &stack).unwrap(), 1);
        registers.load(Register::Fp, StackValue::Int(1), &mut stack).unwrap();
        assert_eq!(stack.fp(), 1);
        registers.load(Register::Sp, StackValue::Int(0), &mut stack).unwrap();
        assert_eq!(stack.sp(), 0);
    }

    #[test]
    fn test_scratch_registers_hold_values() {
        let mut registers = RegisterFile::new();
        let mut stack = EvaluationStack::empty();
        registers.load(Register::S0, StackValue::Int(3), &mut stack).unwrap();
        assert_eq!(registers.fetch(Register::S0, &stack).into_int().unwrap(), 3);
        assert_eq!(registers.pc, -1);
    }
}
