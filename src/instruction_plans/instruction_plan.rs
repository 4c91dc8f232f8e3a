//! Instruction plans: what must be executed and under which ordering
//! constraints, independent of how it ends up split into transactions.

use std::{fmt, sync::Arc};

use solana_sdk::instruction::Instruction;

use super::{transaction_message::TransactionMessage, transaction_size::TransactionSizeEstimator};

/// Largest account growth a single instruction may request
pub const REALLOC_LIMIT: usize = 10_240;

/// Produces instructions on demand until it reports completion
///
/// Packers are stateful: each call consumes part of the remaining work.
pub trait MessagePacker: Send {
    /// Whether every instruction has been produced
    fn done(&self) -> bool;

    /// Pack as much of the remaining work as fits into `message`
    ///
    /// Returns `None` without consuming anything when nothing fits.
    fn pack_message(
        &mut self,
        message: &TransactionMessage,
        estimator: &dyn TransactionSizeEstimator,
    ) -> Option<TransactionMessage>;
}

/// Creates a fresh packer for each planning pass
pub type MessagePackerFactory = Arc<dyn Fn() -> Box<dyn MessagePacker> + Send + Sync>;

/// Instruction plan whose instructions are produced by a [`MessagePacker`]
#[derive(Clone)]
pub struct DynamicInstructionPlan {
    label: &'static str,
    factory: MessagePackerFactory,
}

impl DynamicInstructionPlan {
    pub fn new(label: &'static str, factory: MessagePackerFactory) -> Self {
        Self { label, factory }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn create_packer(&self) -> Box<dyn MessagePacker> {
        (self.factory)()
    }
}

impl fmt::Debug for DynamicInstructionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicInstructionPlan")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Tree of instructions with ordering and atomicity constraints
#[derive(Debug, Clone)]
pub enum InstructionPlan {
    /// Children run in order; non-divisible ones share a single transaction
    Sequential {
        plans: Vec<InstructionPlan>,
        divisible: bool,
    },
    /// Children may run in any order or be packed together
    Parallel { plans: Vec<InstructionPlan> },
    /// Instructions that always land in the same transaction
    Single { instructions: Vec<Instruction> },
    /// Instructions produced on demand to fill transactions to capacity
    Dynamic(DynamicInstructionPlan),
}

impl InstructionPlan {
    pub fn sequential(plans: impl IntoIterator<Item = InstructionPlan>) -> Self {
        Self::Sequential {
            plans: plans.into_iter().collect(),
            divisible: true,
        }
    }

    pub fn non_divisible_sequential(plans: impl IntoIterator<Item = InstructionPlan>) -> Self {
        Self::Sequential {
            plans: plans.into_iter().collect(),
            divisible: false,
        }
    }

    pub fn parallel(plans: impl IntoIterator<Item = InstructionPlan>) -> Self {
        Self::Parallel {
            plans: plans.into_iter().collect(),
        }
    }

    pub fn single(instruction: Instruction) -> Self {
        Self::Single {
            instructions: vec![instruction],
        }
    }

    pub fn atomic(instructions: impl IntoIterator<Item = Instruction>) -> Self {
        Self::Single {
            instructions: instructions.into_iter().collect(),
        }
    }

    pub fn dynamic(label: &'static str, factory: MessagePackerFactory) -> Self {
        Self::Dynamic(DynamicInstructionPlan::new(label, factory))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }

    /// Whether planning this tree would produce no instruction at all
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Sequential { plans, .. } | Self::Parallel { plans } => {
                plans.iter().all(InstructionPlan::is_empty)
            }
            Self::Single { instructions } => instructions.is_empty(),
            Self::Dynamic(dynamic) => dynamic.create_packer().done(),
        }
    }

    /// Instructions of every static leaf, in depth-first order
    ///
    /// Dynamic leaves are skipped since their instructions depend on packing.
    pub fn static_instructions(&self) -> Vec<&Instruction> {
        let mut out = Vec::new();
        collect_static_instructions(self, &mut out);
        out
    }
}

fn collect_static_instructions<'a>(plan: &'a InstructionPlan, out: &mut Vec<&'a Instruction>) {
    match plan {
        InstructionPlan::Sequential { plans, .. } | InstructionPlan::Parallel { plans } => {
            for child in plans {
                collect_static_instructions(child, out);
            }
        }
        InstructionPlan::Single { instructions } => out.extend(instructions.iter()),
        InstructionPlan::Dynamic(_) => {}
    }
}

impl From<Instruction> for InstructionPlan {
    fn from(instruction: Instruction) -> Self {
        Self::single(instruction)
    }
}

type ChunkBuilder = Arc<dyn Fn(usize, usize) -> Instruction + Send + Sync>;

/// Splits `total_length` bytes into instructions that fill each message
///
/// `get_instruction(offset, length)` must build the instruction for the
/// given slice. One byte is kept in reserve for the data length prefix
/// growing as the chunk gets longer.
pub struct LinearMessagePacker {
    total_length: usize,
    offset: usize,
    get_instruction: ChunkBuilder,
}

impl LinearMessagePacker {
    pub fn new(total_length: usize, get_instruction: ChunkBuilder) -> Self {
        Self {
            total_length,
            offset: 0,
            get_instruction,
        }
    }
}

impl MessagePacker for LinearMessagePacker {
    fn done(&self) -> bool {
        self.offset >= self.total_length
    }

    fn pack_message(
        &mut self,
        message: &TransactionMessage,
        estimator: &dyn TransactionSizeEstimator,
    ) -> Option<TransactionMessage> {
        if self.done() {
            return None;
        }

        let empty_chunk = message.appended(&[(self.get_instruction)(self.offset, 0)]);
        let base_size = estimator.transaction_size(&empty_chunk)?;
        let free_space = estimator.size_limit().checked_sub(base_size + 1)?;
        if free_space == 0 {
            return None;
        }

        let length = free_space.min(self.total_length - self.offset);
        let packed = message.appended(&[(self.get_instruction)(self.offset, length)]);
        self.offset += length;
        Some(packed)
    }
}

/// Packs a fixed list of instructions, as many per message as fit
pub struct InstructionsMessagePacker {
    instructions: Vec<Instruction>,
    next: usize,
}

impl InstructionsMessagePacker {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            next: 0,
        }
    }
}

impl MessagePacker for InstructionsMessagePacker {
    fn done(&self) -> bool {
        self.next >= self.instructions.len()
    }

    fn pack_message(
        &mut self,
        message: &TransactionMessage,
        estimator: &dyn TransactionSizeEstimator,
    ) -> Option<TransactionMessage> {
        let mut packed: Option<TransactionMessage> = None;
        while let Some(ix) = self.instructions.get(self.next) {
            let candidate = packed.as_ref().unwrap_or(message).appended(std::slice::from_ref(ix));
            if !estimator.fits(&candidate) {
                break;
            }
            packed = Some(candidate);
            self.next += 1;
        }
        packed
    }
}

/// Dynamic plan writing `total_length` bytes through linear chunks
pub fn linear_instruction_plan<F>(label: &'static str, total_length: usize, get_instruction: F) -> InstructionPlan
where
    F: Fn(usize, usize) -> Instruction + Send + Sync + 'static,
{
    let get_instruction: ChunkBuilder = Arc::new(get_instruction);
    InstructionPlan::dynamic(
        label,
        Arc::new(move || Box::new(LinearMessagePacker::new(total_length, get_instruction.clone()))),
    )
}

/// Dynamic plan packing a known list of instructions
pub fn instructions_plan(label: &'static str, instructions: Vec<Instruction>) -> InstructionPlan {
    InstructionPlan::dynamic(
        label,
        Arc::new(move || Box::new(InstructionsMessagePacker::new(instructions.clone()))),
    )
}

/// Chunk sizes needed to grow an account by `total_size` bytes
pub fn realloc_chunks(total_size: usize) -> Vec<usize> {
    let mut chunks = vec![REALLOC_LIMIT; total_size / REALLOC_LIMIT];
    if total_size % REALLOC_LIMIT != 0 {
        chunks.push(total_size % REALLOC_LIMIT);
    }
    chunks
}

/// Dynamic plan growing an account by `total_size` bytes, one realloc at a time
pub fn realloc_instruction_plan<F>(label: &'static str, total_size: usize, get_instruction: F) -> InstructionPlan
where
    F: Fn(usize) -> Instruction,
{
    let instructions = realloc_chunks(total_size).into_iter().map(get_instruction).collect();
    instructions_plan(label, instructions)
}
