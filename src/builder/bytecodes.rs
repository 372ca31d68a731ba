//! Translation of single bytecodes into nodes.
//!
//! Each handler pops its operands from the builder's state, checks their types and
//! appends the resulting node. Nodes that can trap take their state snapshot before
//! any operand is popped, so a handler sees the stack exactly as the interpreter
//! would at that bci.

use crate::{
    builder::{
        driver::malformed,
        inline::UnresolvedKind,
        GraphBuilder, StoreOutcome,
    },
    bytecode::{Insn, Opcode, Operand},
    database::{ClassRef, FieldRef},
    error::BailoutReason,
    ir::{
        ArithOp, BasicType, CompareOp, Condition, ConstValue, ConvertOp, Instruction, LogicOp,
        Node, NodeFlags, ShiftOp, StateId, ValueId, ValueType,
    },
};

impl GraphBuilder<'_> {
    /// Appends the nodes of one bytecode.
    pub(super) fn parse_insn(&mut self, insn: &Insn) -> Result<(), BailoutReason> {
        use Opcode::*;
        match insn.opcode {
            Nop => {}
            AconstNull => self.push_constant(ConstValue::Null)?,
            IconstM1 => self.push_constant(ConstValue::Int(-1))?,
            Iconst0 => self.push_constant(ConstValue::Int(0))?,
            Iconst1 => self.push_constant(ConstValue::Int(1))?,
            Iconst2 => self.push_constant(ConstValue::Int(2))?,
            Iconst3 => self.push_constant(ConstValue::Int(3))?,
            Iconst4 => self.push_constant(ConstValue::Int(4))?,
            Iconst5 => self.push_constant(ConstValue::Int(5))?,
            Lconst0 => self.push_constant(ConstValue::Long(0))?,
            Lconst1 => self.push_constant(ConstValue::Long(1))?,
            Fconst0 => self.push_constant(ConstValue::Float(0.0))?,
            Fconst1 => self.push_constant(ConstValue::Float(1.0))?,
            Fconst2 => self.push_constant(ConstValue::Float(2.0))?,
            Dconst0 => self.push_constant(ConstValue::Double(0.0))?,
            Dconst1 => self.push_constant(ConstValue::Double(1.0))?,
            Bipush | Sipush => {
                let Operand::Int(value) = insn.operand else {
                    return Err(bad_operand(insn));
                };
                self.push_constant(ConstValue::Int(value))?;
            }
            Ldc | LdcW | Ldc2W => self.load_constant(pool_index(insn)?)?,

            Iload | Iload0 | Iload1 | Iload2 | Iload3 => {
                self.load_local(ValueType::Int, local(insn)?)?;
            }
            Lload | Lload0 | Lload1 | Lload2 | Lload3 => {
                self.load_local(ValueType::Long, local(insn)?)?;
            }
            Fload | Fload0 | Fload1 | Fload2 | Fload3 => {
                self.load_local(ValueType::Float, local(insn)?)?;
            }
            Dload | Dload0 | Dload1 | Dload2 | Dload3 => {
                self.load_local(ValueType::Double, local(insn)?)?;
            }
            Aload | Aload0 | Aload1 | Aload2 | Aload3 => {
                self.load_local(ValueType::Object, local(insn)?)?;
            }
            Istore | Istore0 | Istore1 | Istore2 | Istore3 => {
                self.store_local(ValueType::Int, local(insn)?)?;
            }
            Lstore | Lstore0 | Lstore1 | Lstore2 | Lstore3 => {
                self.store_local(ValueType::Long, local(insn)?)?;
            }
            Fstore | Fstore0 | Fstore1 | Fstore2 | Fstore3 => {
                self.store_local(ValueType::Float, local(insn)?)?;
            }
            Dstore | Dstore0 | Dstore1 | Dstore2 | Dstore3 => {
                self.store_local(ValueType::Double, local(insn)?)?;
            }
            Astore | Astore0 | Astore1 | Astore2 | Astore3 => {
                self.store_local(ValueType::Object, local(insn)?)?;
            }

            Iaload => self.load_indexed(BasicType::Int)?,
            Laload => self.load_indexed(BasicType::Long)?,
            Faload => self.load_indexed(BasicType::Float)?,
            Daload => self.load_indexed(BasicType::Double)?,
            Aaload => self.load_indexed(BasicType::Object)?,
            Baload => self.load_indexed(BasicType::Byte)?,
            Caload => self.load_indexed(BasicType::Char)?,
            Saload => self.load_indexed(BasicType::Short)?,
            Iastore => self.store_indexed(BasicType::Int)?,
            Lastore => self.store_indexed(BasicType::Long)?,
            Fastore => self.store_indexed(BasicType::Float)?,
            Dastore => self.store_indexed(BasicType::Double)?,
            Aastore => self.store_indexed(BasicType::Object)?,
            Bastore => self.store_indexed(BasicType::Byte)?,
            Castore => self.store_indexed(BasicType::Char)?,
            Sastore => self.store_indexed(BasicType::Short)?,

            Pop | Pop2 | Dup | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap => {
                self.stack_op(insn.opcode)?;
            }

            Iadd => self.arithmetic(ValueType::Int, ArithOp::Add)?,
            Ladd => self.arithmetic(ValueType::Long, ArithOp::Add)?,
            Fadd => self.arithmetic(ValueType::Float, ArithOp::Add)?,
            Dadd => self.arithmetic(ValueType::Double, ArithOp::Add)?,
            Isub => self.arithmetic(ValueType::Int, ArithOp::Sub)?,
            Lsub => self.arithmetic(ValueType::Long, ArithOp::Sub)?,
            Fsub => self.arithmetic(ValueType::Float, ArithOp::Sub)?,
            Dsub => self.arithmetic(ValueType::Double, ArithOp::Sub)?,
            Imul => self.arithmetic(ValueType::Int, ArithOp::Mul)?,
            Lmul => self.arithmetic(ValueType::Long, ArithOp::Mul)?,
            Fmul => self.arithmetic(ValueType::Float, ArithOp::Mul)?,
            Dmul => self.arithmetic(ValueType::Double, ArithOp::Mul)?,
            Idiv => self.arithmetic(ValueType::Int, ArithOp::Div)?,
            Ldiv => self.arithmetic(ValueType::Long, ArithOp::Div)?,
            Fdiv => self.arithmetic(ValueType::Float, ArithOp::Div)?,
            Ddiv => self.arithmetic(ValueType::Double, ArithOp::Div)?,
            Irem => self.arithmetic(ValueType::Int, ArithOp::Rem)?,
            Lrem => self.arithmetic(ValueType::Long, ArithOp::Rem)?,
            Frem => self.arithmetic(ValueType::Float, ArithOp::Rem)?,
            Drem => self.arithmetic(ValueType::Double, ArithOp::Rem)?,
            Ineg => self.negate(ValueType::Int)?,
            Lneg => self.negate(ValueType::Long)?,
            Fneg => self.negate(ValueType::Float)?,
            Dneg => self.negate(ValueType::Double)?,
            Ishl => self.shift(ValueType::Int, ShiftOp::Shl)?,
            Lshl => self.shift(ValueType::Long, ShiftOp::Shl)?,
            Ishr => self.shift(ValueType::Int, ShiftOp::Shr)?,
            Lshr => self.shift(ValueType::Long, ShiftOp::Shr)?,
            Iushr => self.shift(ValueType::Int, ShiftOp::Ushr)?,
            Lushr => self.shift(ValueType::Long, ShiftOp::Ushr)?,
            Iand => self.logic(ValueType::Int, LogicOp::And)?,
            Land => self.logic(ValueType::Long, LogicOp::And)?,
            Ior => self.logic(ValueType::Int, LogicOp::Or)?,
            Lor => self.logic(ValueType::Long, LogicOp::Or)?,
            Ixor => self.logic(ValueType::Int, LogicOp::Xor)?,
            Lxor => self.logic(ValueType::Long, LogicOp::Xor)?,
            Iinc => {
                let Operand::Iinc { local, delta } = insn.operand else {
                    return Err(bad_operand(insn));
                };
                self.increment(local, i32::from(delta))?;
            }

            I2l => self.convert(ConvertOp::I2L)?,
            I2f => self.convert(ConvertOp::I2F)?,
            I2d => self.convert(ConvertOp::I2D)?,
            L2i => self.convert(ConvertOp::L2I)?,
            L2f => self.convert(ConvertOp::L2F)?,
            L2d => self.convert(ConvertOp::L2D)?,
            F2i => self.convert(ConvertOp::F2I)?,
            F2l => self.convert(ConvertOp::F2L)?,
            F2d => self.convert(ConvertOp::F2D)?,
            D2i => self.convert(ConvertOp::D2I)?,
            D2l => self.convert(ConvertOp::D2L)?,
            D2f => self.convert(ConvertOp::D2F)?,
            I2b => self.convert(ConvertOp::I2B)?,
            I2c => self.convert(ConvertOp::I2C)?,
            I2s => self.convert(ConvertOp::I2S)?,

            Lcmp => self.compare(ValueType::Long, CompareOp::Lcmp)?,
            Fcmpl => self.compare(ValueType::Float, CompareOp::Fcmpl)?,
            Fcmpg => self.compare(ValueType::Float, CompareOp::Fcmpg)?,
            Dcmpl => self.compare(ValueType::Double, CompareOp::Dcmpl)?,
            Dcmpg => self.compare(ValueType::Double, CompareOp::Dcmpg)?,

            Ifeq => self.if_zero(insn, Condition::Eql)?,
            Ifne => self.if_zero(insn, Condition::Neq)?,
            Iflt => self.if_zero(insn, Condition::Lss)?,
            Ifge => self.if_zero(insn, Condition::Geq)?,
            Ifgt => self.if_zero(insn, Condition::Gtr)?,
            Ifle => self.if_zero(insn, Condition::Leq)?,
            IfIcmpeq => self.if_same(insn, ValueType::Int, Condition::Eql)?,
            IfIcmpne => self.if_same(insn, ValueType::Int, Condition::Neq)?,
            IfIcmplt => self.if_same(insn, ValueType::Int, Condition::Lss)?,
            IfIcmpge => self.if_same(insn, ValueType::Int, Condition::Geq)?,
            IfIcmpgt => self.if_same(insn, ValueType::Int, Condition::Gtr)?,
            IfIcmple => self.if_same(insn, ValueType::Int, Condition::Leq)?,
            IfAcmpeq => self.if_same(insn, ValueType::Object, Condition::Eql)?,
            IfAcmpne => self.if_same(insn, ValueType::Object, Condition::Neq)?,
            Ifnull => self.if_null(insn, Condition::Eql)?,
            Ifnonnull => self.if_null(insn, Condition::Neq)?,
            Goto | GotoW => self.goto(insn)?,
            Jsr | JsrW => self.jsr(insn)?,
            Ret => self.ret(local(insn)?)?,
            Tableswitch => self.table_switch(insn)?,
            Lookupswitch => self.lookup_switch(insn)?,

            Ireturn => self.typed_return(ValueType::Int)?,
            Lreturn => self.typed_return(ValueType::Long)?,
            Freturn => self.typed_return(ValueType::Float)?,
            Dreturn => self.typed_return(ValueType::Double)?,
            Areturn => self.typed_return(ValueType::Object)?,
            Return => self.method_return(None)?,

            Getstatic | Putstatic | Getfield | Putfield => {
                self.access_field(insn.opcode, pool_index(insn)?)?;
            }
            Invokevirtual => self.invoke(crate::ir::InvokeKind::Virtual, pool_index(insn)?)?,
            Invokespecial => self.invoke(crate::ir::InvokeKind::Special, pool_index(insn)?)?,
            Invokestatic => self.invoke(crate::ir::InvokeKind::Static, pool_index(insn)?)?,
            Invokeinterface => self.invoke(crate::ir::InvokeKind::Interface, pool_index(insn)?)?,
            Invokedynamic | Breakpoint => {
                return Err(BailoutReason::UnsupportedBytecode(insn.opcode.mnemonic()));
            }

            New => self.new_instance(pool_index(insn)?)?,
            Newarray => {
                let Operand::ArrayType(code) = insn.operand else {
                    return Err(bad_operand(insn));
                };
                let elem = BasicType::from_newarray_code(code)
                    .ok_or_else(|| malformed(format!("bad newarray type {code}")))?;
                self.new_type_array(elem)?;
            }
            Anewarray => self.new_object_array(pool_index(insn)?)?,
            Multianewarray => {
                let Operand::MultiANewArray { index, dims } = insn.operand else {
                    return Err(bad_operand(insn));
                };
                self.new_multi_array(index, usize::from(dims))?;
            }
            Arraylength => {
                let before = self.copy_state_before();
                let array = self.pop(ValueType::Object)?;
                let length = self.append(
                    Node::new(Instruction::ArrayLength { array }, ValueType::Int)
                        .with_flags(NodeFlags::NEEDS_NULL_CHECK)
                        .with_state_before(before),
                )?;
                self.push(ValueType::Int, length);
            }
            Athrow => self.throw_op()?,
            Checkcast => self.check_cast(pool_index(insn)?)?,
            Instanceof => self.instance_of(pool_index(insn)?)?,
            Monitorenter => {
                let before = self.copy_state_before();
                let object = self.pop(ValueType::Object)?;
                self.monitor_enter(object, before, self.bci)?;
            }
            Monitorexit => {
                let object = self.pop(ValueType::Object)?;
                self.monitor_exit(object, self.bci)?;
            }
            Wide => return Err(malformed("stray wide prefix")),
        }
        Ok(())
    }

    pub(super) fn push(&mut self, ty: ValueType, value: ValueId) {
        self.state.push(value, ty.size());
    }

    /// Pops a value of type `ty`.
    pub(super) fn pop(&mut self, ty: ValueType) -> Result<ValueId, BailoutReason> {
        let value = self
            .state
            .pop(ty.size())
            .ok_or(BailoutReason::StackUnderflow(self.bci))?;
        if self.graph.ty(value) != ty {
            return Err(BailoutReason::TypeMismatch(self.bci));
        }
        Ok(value)
    }

    fn raw_pop(&mut self) -> Result<Option<ValueId>, BailoutReason> {
        self.state
            .raw_pop()
            .ok_or(BailoutReason::StackUnderflow(self.bci))
    }

    /// Appends a constant node; the result may be an equal constant of this block.
    pub(super) fn constant(&mut self, value: ConstValue) -> Result<ValueId, BailoutReason> {
        self.append(Node::constant(value))
    }

    fn push_constant(&mut self, value: ConstValue) -> Result<(), BailoutReason> {
        let node = self.constant(value)?;
        self.push(value.value_type(), node);
        Ok(())
    }

    /// Returns `true` if `value` is known not to be null.
    pub(super) fn is_non_null(&self, value: ValueId) -> bool {
        let node = self.graph.node(value);
        node.instr.is_allocation()
            || node
                .instr
                .as_constant()
                .is_some_and(ConstValue::is_non_null_object)
    }

    fn load_constant(&mut self, index: u16) -> Result<(), BailoutReason> {
        let value = self
            .db
            .load_constant(self.scope.method, index)
            .ok_or_else(|| malformed(format!("unknown constant pool entry {index}")))?;
        let node = if value == ConstValue::Unloaded {
            self.note_unresolved(UnresolvedKind::Constant(index));
            let before = self.copy_state_before();
            self.append(
                Node::constant(value)
                    .with_flags(NodeFlags::NEEDS_PATCHING)
                    .with_state_before(before),
            )?
        } else {
            self.constant(value)?
        };
        self.push(value.value_type(), node);
        Ok(())
    }

    fn load_local(&mut self, ty: ValueType, index: u16) -> Result<(), BailoutReason> {
        let index = usize::from(index);
        let value = self.state.local(index).ok_or(BailoutReason::IllegalLocal {
            index,
            bci: self.bci,
        })?;
        if self.graph.ty(value) != ty {
            return Err(BailoutReason::TypeMismatch(self.bci));
        }
        self.push(ty, value);
        Ok(())
    }

    fn store_local(&mut self, ty: ValueType, index: u16) -> Result<(), BailoutReason> {
        let index = usize::from(index);
        let value = if ty == ValueType::Object {
            // astore also stores the return addresses pushed by jsr.
            let value = self
                .raw_pop()?
                .ok_or(BailoutReason::TypeMismatch(self.bci))?;
            if !matches!(self.graph.ty(value), ValueType::Object | ValueType::Address) {
                return Err(BailoutReason::TypeMismatch(self.bci));
            }
            value
        } else {
            self.pop(ty)?
        };
        self.track_return_address(index, value)?;
        if !self.state.store_local(index, value, |v| self.graph.ty(v)) {
            return Err(BailoutReason::IllegalLocal {
                index,
                bci: self.bci,
            });
        }
        Ok(())
    }

    fn stack_op(&mut self, opcode: Opcode) -> Result<(), BailoutReason> {
        match opcode {
            Opcode::Pop => {
                self.raw_pop()?;
            }
            Opcode::Pop2 => {
                self.raw_pop()?;
                self.raw_pop()?;
            }
            Opcode::Dup => {
                let w1 = self.raw_pop()?;
                self.raw_push(&[w1, w1]);
            }
            Opcode::DupX1 => {
                let w1 = self.raw_pop()?;
                let w2 = self.raw_pop()?;
                self.raw_push(&[w1, w2, w1]);
            }
            Opcode::DupX2 => {
                let w1 = self.raw_pop()?;
                let w2 = self.raw_pop()?;
                let w3 = self.raw_pop()?;
                self.raw_push(&[w1, w3, w2, w1]);
            }
            Opcode::Dup2 => {
                let w1 = self.raw_pop()?;
                let w2 = self.raw_pop()?;
                self.raw_push(&[w2, w1, w2, w1]);
            }
            Opcode::Dup2X1 => {
                let w1 = self.raw_pop()?;
                let w2 = self.raw_pop()?;
                let w3 = self.raw_pop()?;
                self.raw_push(&[w2, w1, w3, w2, w1]);
            }
            Opcode::Dup2X2 => {
                let w1 = self.raw_pop()?;
                let w2 = self.raw_pop()?;
                let w3 = self.raw_pop()?;
                let w4 = self.raw_pop()?;
                self.raw_push(&[w2, w1, w4, w3, w2, w1]);
            }
            Opcode::Swap => {
                let w1 = self.raw_pop()?;
                let w2 = self.raw_pop()?;
                self.raw_push(&[w1, w2]);
            }
            _ => return Err(malformed(format!("{} is not a stack operation", opcode.mnemonic()))),
        }
        Ok(())
    }

    fn raw_push(&mut self, slots: &[Option<ValueId>]) {
        for slot in slots {
            self.state.raw_push(*slot);
        }
    }

    fn arithmetic(&mut self, ty: ValueType, op: ArithOp) -> Result<(), BailoutReason> {
        let traps = matches!(op, ArithOp::Div | ArithOp::Rem)
            && matches!(ty, ValueType::Int | ValueType::Long);
        let before = traps.then(|| self.copy_state_before());
        let y = self.pop(ty)?;
        let x = self.pop(ty)?;
        let mut node = Node::new(Instruction::Arithmetic { op, x, y }, ty);
        node.state_before = before;
        let result = self.append(node)?;
        self.push(ty, result);
        Ok(())
    }

    fn negate(&mut self, ty: ValueType) -> Result<(), BailoutReason> {
        let x = self.pop(ty)?;
        let result = self.append(Node::new(Instruction::Negate { x }, ty))?;
        self.push(ty, result);
        Ok(())
    }

    fn shift(&mut self, ty: ValueType, op: ShiftOp) -> Result<(), BailoutReason> {
        let y = self.pop(ValueType::Int)?;
        let x = self.pop(ty)?;
        let result = self.append(Node::new(Instruction::Shift { op, x, y }, ty))?;
        self.push(ty, result);
        Ok(())
    }

    pub(super) fn logic(&mut self, ty: ValueType, op: LogicOp) -> Result<(), BailoutReason> {
        let y = self.pop(ty)?;
        let x = self.pop(ty)?;
        let result = self.append(Node::new(Instruction::Logic { op, x, y }, ty))?;
        self.push(ty, result);
        Ok(())
    }

    fn increment(&mut self, index: u16, delta: i32) -> Result<(), BailoutReason> {
        self.load_local(ValueType::Int, index)?;
        self.push_constant(ConstValue::Int(delta))?;
        self.arithmetic(ValueType::Int, ArithOp::Add)?;
        self.store_local(ValueType::Int, index)
    }

    fn convert(&mut self, op: ConvertOp) -> Result<(), BailoutReason> {
        let x = self.pop(op.from_type())?;
        let ty = op.to_type();
        let result = self.append(Node::new(Instruction::Convert { op, x }, ty))?;
        self.push(ty, result);
        Ok(())
    }

    fn compare(&mut self, ty: ValueType, op: CompareOp) -> Result<(), BailoutReason> {
        let y = self.pop(ty)?;
        let x = self.pop(ty)?;
        let result = self.append(Node::new(Instruction::Compare { op, x, y }, ValueType::Int))?;
        self.push(ValueType::Int, result);
        Ok(())
    }

    /// Snapshots the state of a branch that jumps backwards; such branches poll for
    /// safepoints.
    fn backward_branch_state(&mut self, targets: &[u32]) -> Option<StateId> {
        let bci = self.bci;
        targets
            .iter()
            .any(|&t| t as i32 <= bci)
            .then(|| self.copy_state_before())
    }

    fn if_zero(&mut self, insn: &Insn, cond: Condition) -> Result<(), BailoutReason> {
        let before = self.backward_branch_state(&insn.branch_targets());
        let x = self.pop(ValueType::Int)?;
        let zero = self.constant(ConstValue::Int(0))?;
        self.if_node(insn, x, cond, zero, before)
    }

    fn if_null(&mut self, insn: &Insn, cond: Condition) -> Result<(), BailoutReason> {
        let before = self.backward_branch_state(&insn.branch_targets());
        let x = self.pop(ValueType::Object)?;
        let null = self.constant(ConstValue::Null)?;
        self.if_node(insn, x, cond, null, before)
    }

    fn if_same(&mut self, insn: &Insn, ty: ValueType, cond: Condition) -> Result<(), BailoutReason> {
        let before = self.backward_branch_state(&insn.branch_targets());
        let y = self.pop(ty)?;
        let x = self.pop(ty)?;
        self.if_node(insn, x, cond, y, before)
    }

    fn if_node(
        &mut self,
        insn: &Insn,
        x: ValueId,
        cond: Condition,
        y: ValueId,
        before: Option<StateId>,
    ) -> Result<(), BailoutReason> {
        let target = branch_target(insn)?;
        let tsux = self.block_for(target)?;
        let fsux = self.block_for(insn.next_bci())?;
        let node = Node::new(
            Instruction::If {
                x,
                cond,
                y,
                tsux,
                fsux,
                unordered_is_true: false,
            },
            ValueType::Void,
        );
        self.append_branch(node, before)
    }

    fn goto(&mut self, insn: &Insn) -> Result<(), BailoutReason> {
        let before = self.backward_branch_state(&insn.branch_targets());
        let target = self.block_for(branch_target(insn)?)?;
        self.append_branch(
            Node::new(Instruction::Goto { target }, ValueType::Void),
            before,
        )
    }

    fn table_switch(&mut self, insn: &Insn) -> Result<(), BailoutReason> {
        let Operand::TableSwitch(table) = &insn.operand else {
            return Err(bad_operand(insn));
        };
        let before = self.backward_branch_state(&insn.branch_targets());
        let tag = self.pop(ValueType::Int)?;
        let default = self.block_for(table.default)?;
        if self.config.canonicalize_nodes && table.targets.len() == 1 {
            let key = self.constant(ConstValue::Int(table.low))?;
            let tsux = self.block_for(table.targets[0])?;
            return self.append_branch(
                Node::new(
                    Instruction::If {
                        x: tag,
                        cond: Condition::Eql,
                        y: key,
                        tsux,
                        fsux: default,
                        unordered_is_true: false,
                    },
                    ValueType::Void,
                ),
                before,
            );
        }
        let targets = table
            .targets
            .iter()
            .map(|&t| self.block_for(t))
            .collect::<Result<Vec<_>, _>>()?;
        self.append_branch(
            Node::new(
                Instruction::TableSwitch {
                    tag,
                    low: table.low,
                    targets,
                    default,
                },
                ValueType::Void,
            ),
            before,
        )
    }

    fn lookup_switch(&mut self, insn: &Insn) -> Result<(), BailoutReason> {
        let Operand::LookupSwitch(table) = &insn.operand else {
            return Err(bad_operand(insn));
        };
        let before = self.backward_branch_state(&insn.branch_targets());
        let tag = self.pop(ValueType::Int)?;
        let default = self.block_for(table.default)?;
        if self.config.canonicalize_nodes && table.pairs.len() == 1 {
            let (key, target) = table.pairs[0];
            let key = self.constant(ConstValue::Int(key))?;
            let tsux = self.block_for(target)?;
            return self.append_branch(
                Node::new(
                    Instruction::If {
                        x: tag,
                        cond: Condition::Eql,
                        y: key,
                        tsux,
                        fsux: default,
                        unordered_is_true: false,
                    },
                    ValueType::Void,
                ),
                before,
            );
        }
        let mut keys = Vec::with_capacity(table.pairs.len());
        let mut targets = Vec::with_capacity(table.pairs.len());
        for &(key, target) in &table.pairs {
            keys.push(key);
            targets.push(self.block_for(target)?);
        }
        self.append_branch(
            Node::new(
                Instruction::LookupSwitch {
                    tag,
                    keys,
                    targets,
                    default,
                },
                ValueType::Void,
            ),
            before,
        )
    }

    /// Appends a block end; a backward branch carries its snapshot and a safepoint.
    fn append_branch(&mut self, node: Node, before: Option<StateId>) -> Result<(), BailoutReason> {
        let node = match before {
            Some(before) => node
                .with_flags(NodeFlags::SAFEPOINT)
                .with_state_before(before),
            None => node,
        };
        self.append(node)?;
        Ok(())
    }

    pub(super) fn block_for(&mut self, bci: u32) -> Result<crate::ir::BlockId, BailoutReason> {
        self.block_at(bci as i32)
            .ok_or_else(|| malformed(format!("no block starts at bci {bci}")))
    }

    fn typed_return(&mut self, ty: ValueType) -> Result<(), BailoutReason> {
        let value = self.pop(ty)?;
        self.method_return(Some(value))
    }

    fn load_indexed(&mut self, elem: BasicType) -> Result<(), BailoutReason> {
        let before = self.copy_state_before();
        let index = self.pop(ValueType::Int)?;
        let array = self.pop(ValueType::Object)?;
        let ty = elem.value_type();
        let value = self.append(
            Node::new(Instruction::LoadIndexed { array, index, elem }, ty)
                .with_flags(NodeFlags::NEEDS_NULL_CHECK)
                .with_state_before(before),
        )?;
        self.push(ty, value);
        Ok(())
    }

    fn store_indexed(&mut self, elem: BasicType) -> Result<(), BailoutReason> {
        let before = self.copy_state_before();
        let value = self.pop(elem.value_type())?;
        let index = self.pop(ValueType::Int)?;
        let array = self.pop(ValueType::Object)?;
        self.append(
            Node::new(
                Instruction::StoreIndexed {
                    array,
                    index,
                    value,
                    elem,
                },
                ValueType::Void,
            )
            .with_flags(NodeFlags::NEEDS_NULL_CHECK)
            .with_state_before(before),
        )?;
        self.memory.store_value(value);
        Ok(())
    }

    fn access_field(&mut self, opcode: Opcode, index: u16) -> Result<(), BailoutReason> {
        let field = self
            .db
            .resolve_field(self.scope.method, index)
            .ok_or_else(|| malformed(format!("unknown field reference {index}")))?;
        let is_static = matches!(opcode, Opcode::Getstatic | Opcode::Putstatic);
        if field.is_static != is_static {
            return Err(malformed(format!(
                "{} on field {} with the wrong kind",
                opcode.mnemonic(),
                field.name
            )));
        }
        let resolved = field.is_resolved();
        if !resolved {
            self.note_unresolved(UnresolvedKind::Field(field.name.clone()));
        }
        let needs_patching = !resolved || (is_static && !field.holder.is_initialized);
        let before = self.copy_state_before();
        let ty = field.ty.value_type();
        let patching = if needs_patching {
            NodeFlags::NEEDS_PATCHING
        } else {
            NodeFlags::empty()
        };

        match opcode {
            Opcode::Getstatic => {
                if let (true, true, Some(value)) =
                    (resolved, field.is_final, field.constant_value)
                {
                    return self.push_constant(value);
                }
                let declared = field.declared_class;
                let load = self.append(
                    Node::new(
                        Instruction::LoadField {
                            object: None,
                            field: Box::new(field),
                        },
                        ty,
                    )
                    .with_declared(declared)
                    .with_flags(patching)
                    .with_state_before(before),
                )?;
                self.push(ty, load);
            }
            Opcode::Putstatic => {
                let value = self.pop_field_value(&field)?;
                self.append(
                    Node::new(
                        Instruction::StoreField {
                            object: None,
                            field: Box::new(field),
                            value,
                        },
                        ValueType::Void,
                    )
                    .with_flags(patching)
                    .with_state_before(before),
                )?;
                self.memory.store_value(value);
            }
            Opcode::Getfield => {
                let object = self.pop(ValueType::Object)?;
                if !needs_patching {
                    if let Some(cached) = self.memory.load(object, &field) {
                        let value = self.narrow_to_field(cached, field.ty)?;
                        self.push(ty, value);
                        return Ok(());
                    }
                }
                let null_check = self.null_check_flag(object);
                let load = self.append(
                    Node::new(
                        Instruction::LoadField {
                            object: Some(object),
                            field: Box::new(field.clone()),
                        },
                        ty,
                    )
                    .with_declared(field.declared_class)
                    .with_flags(patching | null_check)
                    .with_state_before(before),
                )?;
                if !needs_patching {
                    self.memory.record_load(object, &field, load);
                }
                self.push(ty, load);
            }
            Opcode::Putfield => {
                let value = self.pop_field_value(&field)?;
                let object = self.pop(ValueType::Object)?;
                if needs_patching {
                    self.memory.kill();
                } else if self.memory.store(&self.graph, object, &field, value)
                    == StoreOutcome::Eliminated
                {
                    return Ok(());
                }
                let null_check = self.null_check_flag(object);
                self.append(
                    Node::new(
                        Instruction::StoreField {
                            object: Some(object),
                            field: Box::new(field),
                            value,
                        },
                        ValueType::Void,
                    )
                    .with_flags(patching | null_check)
                    .with_state_before(before),
                )?;
            }
            _ => return Err(malformed("not a field access")),
        }
        Ok(())
    }

    /// Pops the value of a field store; booleans are masked to their low bit.
    fn pop_field_value(&mut self, field: &FieldRef) -> Result<ValueId, BailoutReason> {
        let value = self.pop(field.ty.value_type())?;
        if field.ty != BasicType::Boolean {
            return Ok(value);
        }
        let one = self.constant(ConstValue::Int(1))?;
        self.append(Node::new(
            Instruction::Logic {
                op: LogicOp::And,
                x: value,
                y: one,
            },
            ValueType::Int,
        ))
    }

    /// Re-applies the implicit narrowing of a sub-int field to a cached value.
    fn narrow_to_field(&mut self, value: ValueId, ty: BasicType) -> Result<ValueId, BailoutReason> {
        let op = match ty {
            BasicType::Boolean | BasicType::Byte => ConvertOp::I2B,
            BasicType::Char => ConvertOp::I2C,
            BasicType::Short => ConvertOp::I2S,
            _ => return Ok(value),
        };
        self.append(Node::new(Instruction::Convert { op, x: value }, ValueType::Int))
    }

    fn null_check_flag(&self, object: ValueId) -> NodeFlags {
        if self.is_non_null(object) {
            NodeFlags::empty()
        } else {
            NodeFlags::NEEDS_NULL_CHECK
        }
    }

    /// Resolves a class reference, noting it when it is not loaded.
    fn resolve_class(&mut self, index: u16) -> Result<ClassRef, BailoutReason> {
        let klass = self
            .db
            .resolve_class(self.scope.method, index)
            .ok_or_else(|| malformed(format!("unknown class reference {index}")))?;
        if !klass.is_loaded() {
            self.note_unresolved(UnresolvedKind::Class(klass.name.clone()));
        }
        Ok(klass)
    }

    fn new_instance(&mut self, index: u16) -> Result<(), BailoutReason> {
        let klass = self.resolve_class(index)?;
        let flags = patching_flag(&klass);
        let before = self.copy_state_before();
        let object = self.append(
            Node::new(
                Instruction::NewInstance {
                    klass: Box::new(klass),
                },
                ValueType::Object,
            )
            .with_flags(flags)
            .with_state_before(before),
        )?;
        self.memory.new_instance(object);
        self.push(ValueType::Object, object);
        Ok(())
    }

    fn new_type_array(&mut self, elem: BasicType) -> Result<(), BailoutReason> {
        let before = self.copy_state_before();
        let length = self.pop(ValueType::Int)?;
        let array = self.append(
            Node::new(Instruction::NewTypeArray { length, elem }, ValueType::Object)
                .with_state_before(before),
        )?;
        self.push(ValueType::Object, array);
        Ok(())
    }

    fn new_object_array(&mut self, index: u16) -> Result<(), BailoutReason> {
        let klass = self.resolve_class(index)?;
        let flags = patching_flag(&klass);
        let before = self.copy_state_before();
        let length = self.pop(ValueType::Int)?;
        let array = self.append(
            Node::new(
                Instruction::NewObjectArray {
                    length,
                    klass: Box::new(klass),
                },
                ValueType::Object,
            )
            .with_flags(flags)
            .with_state_before(before),
        )?;
        self.push(ValueType::Object, array);
        Ok(())
    }

    fn new_multi_array(&mut self, index: u16, dims: usize) -> Result<(), BailoutReason> {
        let klass = self.resolve_class(index)?;
        let flags = patching_flag(&klass);
        let before = self.copy_state_before();
        let dims = self
            .state
            .pop_arguments(dims)
            .ok_or(BailoutReason::StackUnderflow(self.bci))?;
        if dims.iter().any(|&d| self.graph.ty(d) != ValueType::Int) {
            return Err(BailoutReason::TypeMismatch(self.bci));
        }
        let array = self.append(
            Node::new(
                Instruction::NewMultiArray {
                    klass: Box::new(klass),
                    dims,
                },
                ValueType::Object,
            )
            .with_flags(flags)
            .with_state_before(before),
        )?;
        self.push(ValueType::Object, array);
        Ok(())
    }

    fn check_cast(&mut self, index: u16) -> Result<(), BailoutReason> {
        let klass = self.resolve_class(index)?;
        let flags = patching_flag(&klass);
        let before = self.copy_state_before();
        let object = self.pop(ValueType::Object)?;
        let result = self.append(
            Node::new(
                Instruction::CheckCast {
                    klass: Box::new(klass),
                    object,
                },
                ValueType::Object,
            )
            .with_flags(flags)
            .with_state_before(before),
        )?;
        if result != object {
            // The cast result aliases the object.
            self.memory.store_value(object);
        }
        self.push(ValueType::Object, result);
        Ok(())
    }

    fn instance_of(&mut self, index: u16) -> Result<(), BailoutReason> {
        let klass = self.resolve_class(index)?;
        let flags = patching_flag(&klass);
        let before = (!klass.is_loaded()).then(|| self.copy_state_before());
        let object = self.pop(ValueType::Object)?;
        let mut node = Node::new(
            Instruction::InstanceOf {
                klass: Box::new(klass),
                object,
            },
            ValueType::Int,
        )
        .with_flags(flags);
        node.state_before = before;
        let result = self.append(node)?;
        self.push(ValueType::Int, result);
        Ok(())
    }

    /// Acquires the monitor of `object`.
    pub(super) fn monitor_enter(
        &mut self,
        object: ValueId,
        before: StateId,
        bci: i32,
    ) -> Result<(), BailoutReason> {
        let lock = self.state.lock(object);
        self.append_at(
            Node::new(Instruction::MonitorEnter { object, lock }, ValueType::Void)
                .with_flags(NodeFlags::PINNED)
                .with_state_before(before),
            bci,
        )?;
        self.kill_all();
        Ok(())
    }

    /// Releases the innermost monitor, which must be held on `object`.
    pub(super) fn monitor_exit(&mut self, object: ValueId, bci: i32) -> Result<(), BailoutReason> {
        let lock = self.state.unlock().ok_or(BailoutReason::MonitorUnderflow)?;
        self.append_at(
            Node::new(Instruction::MonitorExit { object, lock }, ValueType::Void)
                .with_flags(NodeFlags::PINNED),
            bci,
        )?;
        self.kill_all();
        Ok(())
    }

    fn throw_op(&mut self) -> Result<(), BailoutReason> {
        let before = self.copy_state_before();
        let exception = self.pop(ValueType::Object)?;
        self.append(
            Node::new(Instruction::Throw { exception }, ValueType::Void)
                .with_state_before(before),
        )?;
        Ok(())
    }
}

fn patching_flag(klass: &ClassRef) -> NodeFlags {
    if klass.is_loaded() {
        NodeFlags::empty()
    } else {
        NodeFlags::NEEDS_PATCHING
    }
}

fn local(insn: &Insn) -> Result<u16, BailoutReason> {
    insn.local().ok_or_else(|| bad_operand(insn))
}

fn pool_index(insn: &Insn) -> Result<u16, BailoutReason> {
    match insn.operand {
        Operand::Index(index)
        | Operand::InvokeInterface { index, .. }
        | Operand::MultiANewArray { index, .. } => Ok(index),
        _ => Err(bad_operand(insn)),
    }
}

fn branch_target(insn: &Insn) -> Result<u32, BailoutReason> {
    match insn.operand {
        Operand::Branch(target) => Ok(target),
        _ => Err(bad_operand(insn)),
    }
}

fn bad_operand(insn: &Insn) -> BailoutReason {
    malformed(format!(
        "unexpected operand for {} at bci {}",
        insn.opcode.mnemonic(),
        insn.bci
    ))
}
