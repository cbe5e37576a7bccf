
use std::io::Write;

use thiserror::Error;

// Mpeg box type.
pub type BoxType = [u8; 4];

//pub type ImmutableBoxes = Vec<dyn ImmutableBox>;

// ImmutableBox is the common trait of boxes.
pub trait ImmutableBox {
    // Type returns the BoxType.
    fn box_type(&self) -> BoxType;

    // Size returns the marshaled size in bytes.
    // The size must be known before marshaling
    // since the box header contains the size.
    fn size(&self) -> usize;

    // Marshal box to writer.
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error>;
}

#[derive(Debug, Error)]
pub enum Mp4Error {
    #[error("write: {0}")]
    Write(#[from] std::io::Error),

    #[error("from int: {0} {1}")]
    FromInt(String, std::num::TryFromIntError),
}

// Tree of boxes that can be marshaled together.
pub struct Boxes {
    pub mp4_box: Box<dyn ImmutableBox>,
    pub children: Vec<Boxes>,
}

impl Boxes {
    #[must_use]
    pub fn new<T: Into<Box<dyn ImmutableBox>>>(mp4_box: T) -> Self {
        Self {
            mp4_box: mp4_box.into(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: Boxes) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_children2(mut self, child1: Boxes, child2: Boxes) -> Self {
        self.children.extend([child1, child2]);
        self
    }
    #[must_use]

    pub fn with_children3(mut self, child1: Boxes, child2: Boxes, child3: Boxes) -> Self {
        self.children.extend([child1, child2, child3]);
        self
    }

    #[must_use]
    pub fn with_children4(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
    ) -> Self {
        self.children.extend([child1, child2, child3, child4]);
        self
    }

    #[must_use]
    pub fn with_children5(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
        child5: Boxes,
    ) -> Self {
        self.children
            .extend([child1, child2, child3, child4, child5]);
        self
    }

    #[must_use]
    pub fn with_children6(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
        child5: Boxes,
        child6: Boxes,
    ) -> Self {
        self.children
            .extend([child1, child2, child3, child4, child5, child6]);
        self
    }

    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn with_children7(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
        child5: Boxes,
        child6: Boxes,
        child7: Boxes,
    ) -> Self {
        self.children
            .extend([child1, child2, child3, child4, child5, child6, child7]);
        self
    }

    // Combined size of this box's own content plus all children, excluding
    // this box's own header.
    fn inner_size(&self) -> usize {
        let mut total = self.mp4_box.size();
        for child in &self.children {
            total += child.total_size();
        }
        total
    }

    // 8 bytes normally, 16 when the total size needs the 64-bit extended
    // header (inner content past the ~4 GiB a 32-bit size field reaches).
    fn header_size(&self) -> usize {
        match u32::try_from(self.inner_size() + 8) {
            Ok(_) => 8,
            Err(_) => 16,
        }
    }

    // Size returns the total size of the box including its header and children.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner_size() + self.header_size()
    }

    fn total_size(&self) -> usize {
        self.size()
    }

    // Marshal box including children.
    pub fn marshal<W: Write>(&self, w: &mut W) -> Result<(), Mp4Error> {
        let inner = self.inner_size();
        let header_size = self.header_size();

        write_box_info(w, inner + header_size, self.mp4_box.box_type())?;

        // The size of an empty box is just its header.
        if inner != 0 {
            self.mp4_box.marshal(w)?;
        }

        for child in &self.children {
            child.marshal(w)?;
        }
        Ok(())
    }
}

/// Writes a box header, choosing the 64-bit extended size form when `size`
/// (the box's total size, header included) doesn't fit in 32 bits.
pub fn write_box_info<W: Write>(w: &mut W, size: usize, typ: BoxType) -> Result<(), Mp4Error> {
    match u32::try_from(size) {
        Ok(size32) => {
            w.write_all(&size32.to_be_bytes())?;
            w.write_all(&typ)?;
        }
        Err(_) => {
            w.write_all(&1u32.to_be_bytes())?;
            w.write_all(&typ)?;
            let size64 = u64::try_from(size)
                .map_err(|e| Mp4Error::FromInt("write large box info".to_owned(), e))?;
            w.write_all(&size64.to_be_bytes())?;
        }
    }
    Ok(())
}

pub fn write_single_box<W: Write>(w: &mut W, b: &dyn ImmutableBox) -> Result<usize, Mp4Error> {
    let size = 8 + b.size();

    write_box_info(w, size, b.box_type())?;

    // The size of a empty box is 8 bytes.
    if size != 8 {
        b.marshal(w)?;
    }
    Ok(size)
}

/*
// Marshal ImmutableBoxes to writer.
fn (boxes ImmutableBoxes) marshal(&self, w: &mut dyn std::io::Write) -> Result<(), MarshalError> {
    for _, b := range boxes {
        if _, err := WriteSingleBox(w, b); err != nil {
            return err
        }
    }
    return nil
}

// Size combined size of boxes.
fn (boxes ImmutableBoxes) size(&self) -> usize {
    var n int
    for _, b := range boxes {
        n += 8
        n += b.Size()
    }
    return n
}

*/
/************************* FullBox **************************/

#[derive(Clone, Copy, Default)]
pub struct FullBox {
    pub version: u8,
    pub flags: [u8; 3],
}

impl FullBox {
    fn get_flags(self) -> u32 {
        parse_fullbox_flags(self.flags)
    }

    fn check_flag(self, flag: u32) -> bool {
        self.get_flags() & flag != 0
    }

    pub fn marshal_field(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&[self.version])?;
        w.write_all(&self.flags)?;
        Ok(())
    }
}

fn parse_fullbox_flags(flags: [u8; 3]) -> u32 {
    (u32::from(flags[0]) << 16) ^ (u32::from(flags[1]) << 8) ^ (u32::from(flags[2]))
}

#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn u32_to_flags(v: u32) -> [u8; 3] {
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

/*************************** ctts ****************************/

pub const TYPE_CTTS: BoxType = *b"ctts";

#[derive(Clone)]
pub struct Ctts {
    pub flags: [u8; 3],
    pub entries: CttsEntries,
}

#[derive(Clone)]
pub enum CttsEntries {
    V0(Vec<CttsEntryV0>),
    V1(Vec<CttsEntryV1>),
}

#[derive(Clone, Copy)]
pub struct CttsEntryV0 {
    pub sample_count: u32,
    pub sample_offset: u32,
}

#[derive(Clone, Copy)]
pub struct CttsEntryV1 {
    pub sample_count: u32,
    pub sample_offset: i32,
}

impl ImmutableBox for Ctts {
    fn box_type(&self) -> BoxType {
        TYPE_CTTS
    }

    fn size(&self) -> usize {
        let num_entries = match &self.entries {
            CttsEntries::V0(v) => v.len(),
            CttsEntries::V1(v) => v.len(),
        };
        8 + num_entries * 8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.entries {
            CttsEntries::V0(entries) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;

                w.write_all(
                    &(u32::try_from(entries.len())
                        .map_err(|e| Mp4Error::FromInt("ctts".to_owned(), e))?)
                    .to_be_bytes(),
                )?;
                for entry in entries {
                    w.write_all(&entry.sample_count.to_be_bytes())?;
                    w.write_all(&entry.sample_offset.to_be_bytes())?;
                }
            }
            CttsEntries::V1(entries) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;

                w.write_all(
                    &(u32::try_from(entries.len())
                        .map_err(|e| Mp4Error::FromInt("ctts".to_owned(), e))?)
                    .to_be_bytes(),
                )?;
                for entry in entries {
                    w.write_all(&entry.sample_count.to_be_bytes())?;
                    w.write_all(&entry.sample_offset.to_be_bytes())?;
                }
            }
        }

        Ok(())
    }
}

impl From<Ctts> for Box<dyn ImmutableBox> {
    fn from(value: Ctts) -> Self {
        Box::new(value)
    }
}

/*************************** dinf ****************************/

pub const TYPE_DINF: BoxType = *b"dinf";

pub struct Dinf;

impl ImmutableBox for Dinf {
    fn box_type(&self) -> BoxType {
        TYPE_DINF
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Dinf> for Box<dyn ImmutableBox> {
    fn from(value: Dinf) -> Self {
        Box::new(value)
    }
}

/*************************** dref ****************************/

pub const TYPE_DREF: BoxType = *b"dref";

pub struct Dref {
    pub full_box: FullBox,
    pub entry_count: u32,
}

impl ImmutableBox for Dref {
    fn box_type(&self) -> BoxType {
        TYPE_DREF
    }

    fn size(&self) -> usize {
        8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.entry_count.to_be_bytes())?;
        Ok(())
    }
}

impl From<Dref> for Box<dyn ImmutableBox> {
    fn from(value: Dref) -> Self {
        Box::new(value)
    }
}

/*************************** url ****************************/

pub const TYPE_URL: BoxType = *b"url ";

pub struct Url {
    pub full_box: FullBox,
    pub location: String,
}

pub const URL_NOPT: u32 = 0x0000_0001;

impl ImmutableBox for Url {
    fn box_type(&self) -> BoxType {
        TYPE_URL
    }

    fn size(&self) -> usize {
        if self.full_box.check_flag(URL_NOPT) {
            4
        } else {
            self.location.len() + 5
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        if !self.full_box.check_flag(URL_NOPT) {
            w.write_all((self.location.clone() + "\0").as_bytes())?;
        }
        Ok(())
    }
}

impl From<Url> for Box<dyn ImmutableBox> {
    fn from(value: Url) -> Self {
        Box::new(value)
    }
}

/*************************** ftyp ****************************/

pub const TYPE_FTYP: BoxType = *b"ftyp";

pub struct Ftyp {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<CompatibleBrandElem>,
}

#[repr(transparent)]
pub struct CompatibleBrandElem(pub [u8; 4]);

impl ImmutableBox for Ftyp {
    fn box_type(&self) -> BoxType {
        TYPE_FTYP
    }

    fn size(&self) -> usize {
        8 + self.compatible_brands.len() * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.major_brand)?;
        w.write_all(&self.minor_version.to_be_bytes())?;
        for brands in &self.compatible_brands {
            w.write_all(&brands.0)?;
        }
        Ok(())
    }
}

impl From<Ftyp> for Box<dyn ImmutableBox> {
    fn from(value: Ftyp) -> Self {
        Box::new(value)
    }
}

/*************************** hdlr ****************************/

pub const TYPE_HDLR: BoxType = *b"hdlr";

#[derive(Default)]
pub struct Hdlr {
    pub full_box: FullBox,
    // Predefined corresponds to component_type of QuickTime.
    // pre_defined of ISO-14496 has albufays zero,
    // hobufever component_type has "mhlr" or "dhlr".
    pub pre_defined: u32,
    pub handler_type: [u8; 4],
    pub reserved: [u32; 3],
    pub name: String,
}

impl ImmutableBox for Hdlr {
    fn box_type(&self) -> BoxType {
        TYPE_HDLR
    }

    fn size(&self) -> usize {
        25 + self.name.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.pre_defined.to_be_bytes())?;
        w.write_all(&self.handler_type)?;
        for reserved in &self.reserved {
            w.write_all(&reserved.to_be_bytes())?;
        }
        w.write_all((self.name.clone() + "\0").as_bytes())?;
        Ok(())
    }
}

impl From<Hdlr> for Box<dyn ImmutableBox> {
    fn from(value: Hdlr) -> Self {
        Box::new(value)
    }
}

/*************************** mdat ****************************/

pub const TYPE_MDAT: BoxType = *b"mdat";

pub struct Mdat(pub Vec<u8>);

impl ImmutableBox for Mdat {
    fn box_type(&self) -> BoxType {
        TYPE_MDAT
    }

    fn size(&self) -> usize {
        self.0.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.0)?;
        Ok(())
    }
}

impl From<Mdat> for Box<dyn ImmutableBox> {
    fn from(value: Mdat) -> Self {
        Box::new(value)
    }
}

/*************************** mdia ****************************/

pub const TYPE_MDIA: BoxType = *b"mdia";

pub struct Mdia;

impl ImmutableBox for Mdia {
    fn box_type(&self) -> BoxType {
        TYPE_MDIA
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Mdia> for Box<dyn ImmutableBox> {
    fn from(value: Mdia) -> Self {
        Box::new(value)
    }
}

/*************************** mdhd ****************************/

pub const TYPE_MDHD: BoxType = *b"mdhd";

#[derive(Default)]
pub struct Mdhd {
    pub flags: [u8; 3],
    pub version: MdhdVersion,
    pub timescale: u32,

    pub pad: bool,         // 1 bit.
    pub language: [u8; 3], // 5 bits. ISO-639-2/T language code
    pub pre_defined: u16,
}

pub enum MdhdVersion {
    V0(MdhdV0),
    V1(MdhdV1),
}

impl Default for MdhdVersion {
    fn default() -> Self {
        Self::V0(MdhdV0::default())
    }
}

#[derive(Default)]
pub struct MdhdV0 {
    pub creation_time: u32,
    pub modification_time: u32,
    pub duration: u32,
}

pub struct MdhdV1 {
    pub creation_time: u64,
    pub modification_time: u64,
    pub duration: u64,
}

impl ImmutableBox for Mdhd {
    fn box_type(&self) -> BoxType {
        TYPE_MDHD
    }

    fn size(&self) -> usize {
        match self.version {
            MdhdVersion::V0(_) => 24,
            MdhdVersion::V1(_) => 36,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.version {
            MdhdVersion::V0(v) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
            MdhdVersion::V1(v) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
        }

        if self.pad {
            w.write_all(&[(0b0000_0001 << 7
                | (self.language[0] & 0b0001_1111) << 2
                | (self.language[1] & 0b0001_1111) >> 3)])?;
        } else {
            w.write_all(&[
                ((self.language[0] & 0b0001_1111) << 2 | (self.language[1] & 0b0001_1111) >> 3)
            ])?;
        }

        w.write_all(&[(self.language[1] << 5 | self.language[2] & 0b0001_1111)])?;
        w.write_all(&self.pre_defined.to_be_bytes())?;
        Ok(())
    }
}

impl From<Mdhd> for Box<dyn ImmutableBox> {
    fn from(value: Mdhd) -> Self {
        Box::new(value)
    }
}

/*************************** minf ****************************/

pub const TYPE_MINF: BoxType = *b"minf";

pub struct Minf;

impl ImmutableBox for Minf {
    fn box_type(&self) -> BoxType {
        TYPE_MINF
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Minf> for Box<dyn ImmutableBox> {
    fn from(value: Minf) -> Self {
        Box::new(value)
    }
}

/*************************** moov ****************************/

pub const TYPE_MOOV: BoxType = *b"moov";

pub struct Moov;

impl ImmutableBox for Moov {
    fn box_type(&self) -> BoxType {
        TYPE_MOOV
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Moov> for Box<dyn ImmutableBox> {
    fn from(value: Moov) -> Self {
        Box::new(value)
    }
}

/*************************** mvhd ****************************/

pub const TYPE_MVHD: BoxType = *b"mvhd";

#[derive(Default)]
pub struct Mvhd {
    pub flags: [u8; 3],
    pub version: MvhdVersion,
    pub timescale: u32,
    pub rate: i32,   // fixed-point 16.16 - template=0x00010000
    pub volume: i16, // template=0x0100
    pub reserved: i16,
    pub reserved2: [i32; 2],
    pub matrix: [i32; 9], // template={ 0x00010000,0,0,0,0x00010000,0,0,0,0x40000000 }
    pub pre_defined: [i32; 6],
    pub next_track_id: u32,
}

pub enum MvhdVersion {
    V0(MvhdV0),
    V1(MvhdV1),
}

impl Default for MvhdVersion {
    fn default() -> Self {
        Self::V0(MvhdV0::default())
    }
}

#[derive(Default)]
pub struct MvhdV0 {
    pub creation_time: u32,
    pub modification_time: u32,
    pub duration: u32,
}

pub struct MvhdV1 {
    pub creation_time: u64,
    pub modification_time: u64,
    pub duration: u64,
}

impl ImmutableBox for Mvhd {
    fn box_type(&self) -> BoxType {
        TYPE_MVHD
    }

    fn size(&self) -> usize {
        match self.version {
            MvhdVersion::V0(_) => 100,
            MvhdVersion::V1(_) => 112,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.version {
            MvhdVersion::V0(v) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
            MvhdVersion::V1(v) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
        }

        w.write_all(&self.rate.to_be_bytes())?;
        w.write_all(&self.volume.to_be_bytes())?;
        w.write_all(&self.reserved.to_be_bytes())?;

        for reserved in &self.reserved2 {
            w.write_all(&reserved.to_be_bytes())?;
        }
        for matrix in &self.matrix {
            w.write_all(&matrix.to_be_bytes())?;
        }
        for pre_defined in &self.pre_defined {
            w.write_all(&pre_defined.to_be_bytes())?;
        }

        w.write_all(&self.next_track_id.to_be_bytes())?;

        Ok(())
    }
}

impl From<Mvhd> for Box<dyn ImmutableBox> {
    fn from(value: Mvhd) -> Self {
        Box::new(value)
    }
}

/*************************** stbl ****************************/

pub const TYPE_STBL: BoxType = *b"stbl";

pub struct Stbl;

impl ImmutableBox for Stbl {
    fn box_type(&self) -> BoxType {
        TYPE_STBL
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Stbl> for Box<dyn ImmutableBox> {
    fn from(value: Stbl) -> Self {
        Box::new(value)
    }
}

/*************************** stco ****************************/

pub const TYPE_STCO: BoxType = *b"stco";

#[derive(Default)]
pub struct Stco {
    pub full_box: FullBox,
    pub chunk_offsets: Vec<u32>,
}

impl ImmutableBox for Stco {
    fn box_type(&self) -> BoxType {
        TYPE_STCO
    }

    fn size(&self) -> usize {
        8 + (self.chunk_offsets.len()) * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.chunk_offsets.len())
                .map_err(|e| Mp4Error::FromInt("stco".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for offset in &self.chunk_offsets {
            w.write_all(&offset.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Stco> for Box<dyn ImmutableBox> {
    fn from(value: Stco) -> Self {
        Box::new(value)
    }
}

/*************************** co64 ****************************/

pub const TYPE_CO64: BoxType = *b"co64";

#[derive(Default)]
pub struct Co64 {
    pub full_box: FullBox,
    pub chunk_offsets: Vec<u64>,
}

impl ImmutableBox for Co64 {
    fn box_type(&self) -> BoxType {
        TYPE_CO64
    }

    fn size(&self) -> usize {
        8 + (self.chunk_offsets.len()) * 8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.chunk_offsets.len())
                .map_err(|e| Mp4Error::FromInt("co64".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for offset in &self.chunk_offsets {
            w.write_all(&offset.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Co64> for Box<dyn ImmutableBox> {
    fn from(value: Co64) -> Self {
        Box::new(value)
    }
}

/*************************** stsc ****************************/

pub const TYPE_STSC: BoxType = *b"stsc";

#[derive(Clone, Copy)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

impl StscEntry {
    fn marshal_field(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.first_chunk.to_be_bytes())?;
        w.write_all(&self.samples_per_chunk.to_be_bytes())?;
        w.write_all(&self.sample_description_index.to_be_bytes())?;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct Stsc {
    pub full_box: FullBox,
    pub entries: Vec<StscEntry>,
}

impl ImmutableBox for Stsc {
    fn box_type(&self) -> BoxType {
        TYPE_STSC
    }

    fn size(&self) -> usize {
        8 + self.entries.len() * 12
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.entries.len())
                .map_err(|e| Mp4Error::FromInt("stsc".to_owned(), e))?
                .to_be_bytes(),
        )?; // Entry count.
        for entry in &self.entries {
            entry.marshal_field(w)?;
        }
        Ok(())
    }
}

impl From<Stsc> for Box<dyn ImmutableBox> {
    fn from(value: Stsc) -> Self {
        Box::new(value)
    }
}

/*************************** stss ****************************/

pub const TYPE_STSS: BoxType = *b"stss";

#[derive(Clone)]
pub struct Stss {
    pub full_box: FullBox,
    pub sample_numbers: Vec<u32>,
}

impl ImmutableBox for Stss {
    fn box_type(&self) -> BoxType {
        TYPE_STSS
    }

    fn size(&self) -> usize {
        8 + self.sample_numbers.len() * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.sample_numbers.len())
                .map_err(|e| Mp4Error::FromInt("stss".to_owned(), e))?
                .to_be_bytes(),
        )?; // Entry count.
        for number in &self.sample_numbers {
            w.write_all(&number.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Stss> for Box<dyn ImmutableBox> {
    fn from(value: Stss) -> Self {
        Box::new(value)
    }
}

/*************************** stsz ****************************/

pub const TYPE_STSZ: BoxType = *b"stsz";

#[derive(Default, Clone)]
pub struct Stsz {
    pub full_box: FullBox,
    pub sample_size: u32,
    pub sample_count: u32,
    pub entry_sizes: Vec<u32>,
}

impl ImmutableBox for Stsz {
    fn box_type(&self) -> BoxType {
        TYPE_STSZ
    }

    fn size(&self) -> usize {
        12 + self.entry_sizes.len() * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.sample_size.to_be_bytes())?;
        w.write_all(&self.sample_count.to_be_bytes())?;
        for entry in &self.entry_sizes {
            w.write_all(&entry.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Stsz> for Box<dyn ImmutableBox> {
    fn from(value: Stsz) -> Self {
        Box::new(value)
    }
}

/*************************** stts ****************************/

pub const TYPE_STTS: BoxType = *b"stts";

#[derive(Default, Clone)]
pub struct Stts {
    pub full_box: FullBox,
    pub entries: Vec<SttsEntry>,
}

#[derive(Clone)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

impl SttsEntry {
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.sample_count.to_be_bytes())?;
        w.write_all(&self.sample_delta.to_be_bytes())?;
        Ok(())
    }
}

impl ImmutableBox for Stts {
    fn box_type(&self) -> BoxType {
        TYPE_STTS
    }

    fn size(&self) -> usize {
        8 + self.entries.len() * 8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.entries.len())
                .map_err(|e| Mp4Error::FromInt("stts".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for entry in &self.entries {
            entry.marshal(w)?;
        }
        Ok(())
    }
}

impl From<Stts> for Box<dyn ImmutableBox> {
    fn from(value: Stts) -> Self {
        Box::new(value)
    }
}

/*************************** tkhd ****************************/

pub const TYPE_TKHD: BoxType = *b"tkhd";

#[derive(Default)]
pub struct Tkhd {
    pub flags: [u8; 3],
    pub version: TkhdVersion,
    pub track_id: u32,
    pub reserved0: u32,
    pub reserved1: [u32; 2],
    pub layer: i16,           // template=0
    pub alternate_group: i16, // template=0
    pub volume: i16,          // template={if track_is_audio 0x0100 else 0}
    pub reserved2: u16,
    pub matrix: [i32; 9], // template={ 0x00010000,0,0,0,0x00010000,0,0,0,0x40000000 };
    pub width: u32,       // fixed-point 16.16
    pub height: u32,      // fixed-point 16.16
}

pub enum TkhdVersion {
    V0(TkhdV0),
    V1(TkhdV1),
}

impl Default for TkhdVersion {
    fn default() -> Self {
        Self::V0(TkhdV0::default())
    }
}

#[derive(Default)]
pub struct TkhdV0 {
    pub creation_time: u32,
    pub modification_time: u32,
    pub duration: u32,
}

pub struct TkhdV1 {
    pub creation_time: u64,
    pub modification_time: u64,
    pub duration: u64,
}

impl ImmutableBox for Tkhd {
    fn box_type(&self) -> BoxType {
        TYPE_TKHD
    }

    fn size(&self) -> usize {
        match self.version {
            TkhdVersion::V0(_) => 84,
            TkhdVersion::V1(_) => 96,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.version {
            TkhdVersion::V0(v) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.track_id.to_be_bytes())?;
                w.write_all(&self.reserved0.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
            TkhdVersion::V1(v) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.track_id.to_be_bytes())?;
                w.write_all(&self.reserved0.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
        }

        for reserved in &self.reserved1 {
            w.write_all(&reserved.to_be_bytes())?;
        }
        w.write_all(&self.layer.to_be_bytes())?;
        w.write_all(&self.alternate_group.to_be_bytes())?;
        w.write_all(&self.volume.to_be_bytes())?;
        w.write_all(&self.reserved2.to_be_bytes())?;
        for matrix in &self.matrix {
            w.write_all(&matrix.to_be_bytes())?;
        }
        w.write_all(&self.width.to_be_bytes())?;
        w.write_all(&self.height.to_be_bytes())?;

        Ok(())
    }
}

impl From<Tkhd> for Box<dyn ImmutableBox> {
    fn from(value: Tkhd) -> Self {
        Box::new(value)
    }
}

/*************************** trak ****************************/

pub const TYPE_TRAK: BoxType = *b"trak";

pub struct Trak;

impl ImmutableBox for Trak {
    fn box_type(&self) -> BoxType {
        TYPE_TRAK
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Trak> for Box<dyn ImmutableBox> {
    fn from(value: Trak) -> Self {
        Box::new(value)
    }
}

/*************************** vmhd ****************************/

pub const TYPE_VMHD: BoxType = *b"vmhd";

#[derive(Default)]
pub struct Vmhd {
    pub full_box: FullBox,
    pub graphics_mode: u16, // template=0
    pub opcolor: [u16; 3],  // template={0, 0, 0}
}

impl ImmutableBox for Vmhd {
    fn box_type(&self) -> BoxType {
        TYPE_VMHD
    }

    fn size(&self) -> usize {
        12
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.graphics_mode.to_be_bytes())?;
        for color in &self.opcolor {
            w.write_all(&color.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Vmhd> for Box<dyn ImmutableBox> {
    fn from(value: Vmhd) -> Self {
        Box::new(value)
    }
}
